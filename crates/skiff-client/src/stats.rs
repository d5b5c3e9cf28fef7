//! Aggregate transfer statistics.
//!
//! Counters are updated per session and logged periodically by a
//! background reporter. Observable side effect only; nothing reads these
//! back on the hot path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Aggregate byte counters across all sessions.
#[derive(Debug, Default)]
pub struct Stats {
    sent: AtomicU64,
    received: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one session's byte counts.
    pub fn record(&self, up: u64, down: u64) {
        self.sent.fetch_add(up, Ordering::Relaxed);
        self.received.fetch_add(down, Ordering::Relaxed);
    }

    /// Total plaintext bytes sent upstream.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Total plaintext bytes received from upstream.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Start a background task logging totals every `interval`.
    pub fn start_reporter(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let stats = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        debug!(
                            sent_mb = stats.sent() / (1024 * 1024),
                            received_mb = stats.received() / (1024 * 1024),
                            "aggregate transfer"
                        );
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates() {
        let stats = Stats::new();
        stats.record(100, 5);
        stats.record(20, 7);
        assert_eq!(stats.sent(), 120);
        assert_eq!(stats.received(), 12);
    }
}
