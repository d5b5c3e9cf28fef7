//! Bounded pool of live upstream transports.
//!
//! Entries are pre-dialed by a [`Connector`] factory and handed out
//! exclusively; a returned entry goes back onto a LIFO idle deque unless
//! it is expired, unusable, or the idle cap is reached. Capacity is
//! enforced with a semaphore whose permits travel inside the entries, so
//! `idle + in_flight` can never exceed `max`. A `get` at capacity blocks
//! cooperatively until an entry is returned or a slot frees up.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use skiff_core::defaults::{
    DEFAULT_POOL_IDLE_TIMEOUT_SECS, DEFAULT_POOL_INITIAL, DEFAULT_POOL_MAX,
    DEFAULT_POOL_MAX_IDLE, DEFAULT_POOL_MAX_LIFETIME_SECS,
};

/// Dials one upstream transport.
///
/// The pool is agnostic to the stream type; production uses a TLS dialer
/// that wraps the connection in a cipher stream, tests use in-memory
/// streams.
pub trait Connector: Send + Sync + 'static {
    /// The stream type produced by this connector.
    type Stream: Send + 'static;

    /// Dial and fully establish one transport.
    fn connect(&self)
    -> Pin<Box<dyn Future<Output = std::io::Result<Self::Stream>> + Send + '_>>;
}

/// Pool sizing and expiry configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Entries pre-dialed by [`Pool::warm_up`].
    pub initial: usize,
    /// Hard upper bound on concurrent entries (idle + in flight).
    pub max: usize,
    /// Upper bound on idle entries retained.
    pub max_idle: usize,
    /// Idle entry TTL.
    pub idle_timeout: Duration,
    /// Absolute entry TTL.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_POOL_INITIAL,
            max: DEFAULT_POOL_MAX,
            max_idle: DEFAULT_POOL_MAX_IDLE,
            idle_timeout: Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT_SECS),
            max_lifetime: Duration::from_secs(DEFAULT_POOL_MAX_LIFETIME_SECS),
        }
    }
}

/// Errors surfaced by pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,

    #[error("connection factory failed: {0}")]
    Factory(#[source] std::io::Error),
}

/// An entry checked out of the pool, exclusively owned by one session.
///
/// The capacity permit rides inside; dropping the entry (or having `put`
/// discard it) closes the stream and frees the slot.
pub struct PoolEntry<S> {
    stream: S,
    created_at: Instant,
    unusable: AtomicBool,
    _permit: OwnedSemaphorePermit,
}

impl<S> PoolEntry<S> {
    /// Shared access to the transport.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Exclusive access to the transport.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// One-way latch: the next `put` will close this entry instead of
    /// retaining it.
    pub fn mark_unusable(&self) {
        self.unusable.store(true, Ordering::Release);
    }

    /// Whether the unusable latch has been set.
    pub fn is_unusable(&self) -> bool {
        self.unusable.load(Ordering::Acquire)
    }

    /// Time since the underlying transport was dialed.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

struct Idle<S> {
    stream: S,
    created_at: Instant,
    returned_at: Instant,
    permit: OwnedSemaphorePermit,
}

impl<S> Idle<S> {
    fn expired(&self, config: &PoolConfig) -> bool {
        self.created_at.elapsed() > config.max_lifetime
            || self.returned_at.elapsed() > config.idle_timeout
    }
}

/// Bounded pool of live transports with idle reuse.
pub struct Pool<C: Connector> {
    connector: C,
    config: PoolConfig,
    idle: Mutex<VecDeque<Idle<C::Stream>>>,
    capacity: Arc<Semaphore>,
    returned: Notify,
    closed: AtomicBool,
}

impl<C: Connector> Pool<C> {
    /// Create an empty pool. Call [`Pool::warm_up`] to pre-dial the
    /// initial entries.
    pub fn new(config: PoolConfig, connector: C) -> Arc<Self> {
        Arc::new(Self {
            connector,
            capacity: Arc::new(Semaphore::new(config.max)),
            config,
            idle: Mutex::new(VecDeque::new()),
            returned: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Pre-dial the configured number of initial entries. The first dial
    /// failure is propagated.
    pub async fn warm_up(&self) -> Result<(), PoolError> {
        let target = self.config.initial.min(self.config.max);
        for _ in 0..target {
            let Ok(permit) = self.capacity.clone().try_acquire_owned() else {
                break;
            };
            let stream = self.connector.connect().await.map_err(PoolError::Factory)?;
            let now = Instant::now();
            self.idle.lock().push_back(Idle {
                stream,
                created_at: now,
                returned_at: now,
                permit,
            });
        }
        debug!(idle = self.idle_len(), "pool warmed up");
        Ok(())
    }

    /// Check out an entry: the freshest idle one, or a newly dialed one
    /// if below capacity. Expired idle entries encountered are closed and
    /// skipped. Blocks cooperatively while the pool is at capacity.
    pub async fn get(&self) -> Result<PoolEntry<C::Stream>, PoolError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }

            let idle = self.idle.lock().pop_back();
            match idle {
                Some(entry) if !entry.expired(&self.config) => {
                    return Ok(PoolEntry {
                        stream: entry.stream,
                        created_at: entry.created_at,
                        unusable: AtomicBool::new(false),
                        _permit: entry.permit,
                    });
                }
                Some(_expired) => {
                    debug!("closing expired idle connection");
                    continue;
                }
                None => {}
            }

            match self.capacity.clone().try_acquire_owned() {
                Ok(permit) => return self.dial(permit).await,
                Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
                Err(TryAcquireError::NoPermits) => {}
            }

            // At capacity with nothing idle: wait for a return or for a
            // discarded entry to free a slot.
            tokio::select! {
                _ = self.returned.notified() => {}
                permit = self.capacity.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => return self.dial(permit).await,
                        Err(_) => return Err(PoolError::Closed),
                    }
                }
            }
        }
    }

    async fn dial(&self, permit: OwnedSemaphorePermit) -> Result<PoolEntry<C::Stream>, PoolError> {
        let stream = self.connector.connect().await.map_err(PoolError::Factory)?;
        Ok(PoolEntry {
            stream,
            created_at: Instant::now(),
            unusable: AtomicBool::new(false),
            _permit: permit,
        })
    }

    /// Return an entry. Unusable, expired, or over-cap entries are closed
    /// instead of retained.
    pub fn put(&self, entry: PoolEntry<C::Stream>) {
        if self.closed.load(Ordering::Acquire)
            || entry.is_unusable()
            || entry.age() > self.config.max_lifetime
        {
            debug!(unusable = entry.is_unusable(), "discarding returned connection");
            return;
        }

        let PoolEntry {
            stream,
            created_at,
            _permit: permit,
            ..
        } = entry;

        {
            let mut idle = self.idle.lock();
            if idle.len() >= self.config.max_idle {
                debug!("idle cap reached, closing returned connection");
                return;
            }
            idle.push_back(Idle {
                stream,
                created_at,
                returned_at: Instant::now(),
                permit,
            });
        }
        self.returned.notify_one();
    }

    /// Close the pool: drop all idle entries and fail pending and future
    /// `get`s. In-flight entries are closed when they come back to `put`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.capacity.close();
        self.idle.lock().clear();
        self.returned.notify_waiters();
    }

    /// Drop idle entries whose age or idle time exceeds the limits.
    /// Correctness does not depend on this; `get` re-checks on dispense.
    pub fn sweep(&self) {
        let mut idle = self.idle.lock();
        let before = idle.len();
        idle.retain(|entry| !entry.expired(&self.config));
        let removed = before - idle.len();
        if removed > 0 {
            debug!(removed, remaining = idle.len(), "swept expired idle connections");
        }
    }

    /// Start a background task sweeping expired idle entries.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if pool.closed.load(Ordering::Acquire) {
                    break;
                }
                pool.sweep();
            }
        })
    }

    /// Number of idle entries currently retained.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    /// Connector yielding sequential ids, counting dials.
    #[derive(Clone)]
    struct CountingConnector {
        dials: Arc<AtomicUsize>,
    }

    impl CountingConnector {
        fn new() -> Self {
            Self {
                dials: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Connector for CountingConnector {
        type Stream = usize;

        fn connect(
            &self,
        ) -> Pin<Box<dyn Future<Output = std::io::Result<Self::Stream>> + Send + '_>> {
            let dials = self.dials.clone();
            Box::pin(async move { Ok(dials.fetch_add(1, Ordering::SeqCst)) })
        }
    }

    fn config(initial: usize, max: usize, max_idle: usize) -> PoolConfig {
        PoolConfig {
            initial,
            max,
            max_idle,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn get_dials_when_empty() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(0, 4, 4), connector.clone());

        let entry = pool.get().await.unwrap();
        assert_eq!(*entry.stream(), 0);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn put_then_get_reuses() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(0, 4, 4), connector.clone());

        let entry = pool.get().await.unwrap();
        pool.put(entry);
        assert_eq!(pool.idle_len(), 1);

        let entry = pool.get().await.unwrap();
        assert_eq!(*entry.stream(), 0);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn warm_up_fills_initial() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(3, 4, 4), connector.clone());

        pool.warm_up().await.unwrap();
        assert_eq!(pool.idle_len(), 3);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unusable_entries_are_never_retained() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(0, 4, 4), connector.clone());

        let entry = pool.get().await.unwrap();
        entry.mark_unusable();
        assert!(entry.is_unusable());
        pool.put(entry);
        assert_eq!(pool.idle_len(), 0);

        let entry = pool.get().await.unwrap();
        assert_eq!(*entry.stream(), 1, "a fresh dial replaces the discard");
    }

    #[tokio::test]
    async fn idle_cap_is_enforced() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(0, 4, 1), connector);

        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.idle_len(), 1);
    }

    #[tokio::test]
    async fn expired_idle_entries_are_skipped_on_get() {
        let connector = CountingConnector::new();
        let pool = Pool::new(
            PoolConfig {
                idle_timeout: Duration::from_millis(10),
                ..config(0, 4, 4)
            },
            connector.clone(),
        );

        let entry = pool.get().await.unwrap();
        pool.put(entry);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let entry = pool.get().await.unwrap();
        assert_eq!(*entry.stream(), 1, "expired entry was closed and skipped");
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lifetime_expiry_discards_on_put() {
        let connector = CountingConnector::new();
        let pool = Pool::new(
            PoolConfig {
                max_lifetime: Duration::from_millis(10),
                ..config(0, 4, 4)
            },
            connector,
        );

        let entry = pool.get().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.put(entry);
        assert_eq!(pool.idle_len(), 0);
    }

    #[tokio::test]
    async fn get_blocks_at_capacity_until_put() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(0, 2, 2), connector);

        let a = pool.get().await.unwrap();
        let _b = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await })
        };

        // The third get must still be pending.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.put(a);
        let entry = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter resolves after put")
            .unwrap()
            .unwrap();
        assert_eq!(*entry.stream(), 0, "the returned entry was dispensed");
    }

    #[tokio::test]
    async fn discarding_an_entry_frees_a_slot() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(0, 1, 1), connector);

        let a = pool.get().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(a); // frees the capacity permit without a put
        let entry = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter resolves after drop")
            .unwrap()
            .unwrap();
        assert_eq!(*entry.stream(), 1, "a fresh dial fills the freed slot");
    }

    #[tokio::test]
    async fn sweep_removes_expired_idle_entries() {
        let connector = CountingConnector::new();
        let pool = Pool::new(
            PoolConfig {
                idle_timeout: Duration::from_millis(10),
                ..config(0, 4, 4)
            },
            connector,
        );

        let entry = pool.get().await.unwrap();
        pool.put(entry);
        assert_eq!(pool.idle_len(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.sweep();
        assert_eq!(pool.idle_len(), 0);
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_gets() {
        let connector = CountingConnector::new();
        let pool = Pool::new(config(0, 1, 1), connector);

        let _held = pool.get().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.close();
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
        assert!(matches!(pool.get().await, Err(PoolError::Closed)));
        assert_eq!(pool.idle_len(), 0);
    }
}
