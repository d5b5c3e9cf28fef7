//! Bidirectional relay between a plaintext connection and a pooled
//! cipher connection, with the end-of-session reuse handshake.
//!
//! Two half-duplex copies run concurrently: up (plaintext read → cipher
//! write) and down (cipher read → plaintext write). Each produces a
//! reuse verdict for its direction; when both verdicts pass, an ACK
//! exchange confirms the cipher connection sits at a clean session
//! boundary and may serve another session. Anything else latches the
//! pool entry unusable so the pool closes it on return.
//!
//! Session errors never escape to the caller; they only influence the
//! verdicts. The caller observes byte counts.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use skiff_cipher::{CipherError, CipherReadHalf, CipherStream, Flag, ReadStatus};
use skiff_core::bytespool;
use skiff_pool::PoolEntry;

/// Bytes transferred in each direction during a relay session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Plaintext-to-cipher bytes.
    pub up: u64,
    /// Cipher-to-plaintext bytes.
    pub down: u64,
}

impl RelayStats {
    /// Total bytes transferred in both directions.
    pub fn total(self) -> u64 {
        self.up + self.down
    }
}

/// Relay bytes between `plain` and the cipher connection inside `entry`
/// until both directions terminate, then negotiate reuse.
///
/// `timeout` bounds the post-error drain and the ACK exchange; there is
/// no inactivity timeout during steady-state copy. On any unclean
/// termination the entry is marked unusable as a side effect.
pub async fn relay<P, S>(
    plain: &mut P,
    entry: &mut PoolEntry<CipherStream<S>>,
    timeout: Duration,
) -> RelayStats
where
    P: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (up, reuse_up, down, reuse_down) = {
        let (mut cipher_read, mut cipher_write) = entry.stream_mut().split();
        let (mut plain_read, mut plain_write) = tokio::io::split(plain);

        let up_task = async {
            let mut buf = bytespool::acquire();
            let mut copied: u64 = 0;
            loop {
                match plain_read.read(&mut buf[..]).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = cipher_write.write(&buf[..n]).await {
                            debug!(error = %e, "copy to cipher stream failed");
                            break;
                        }
                        copied += n as u64;
                    }
                    Err(e) => {
                        debug!(error = %e, "plaintext read ended");
                        break;
                    }
                }
            }
            // Half-close our direction. The stream stays a reuse candidate
            // only if the peer actually receives the FIN.
            let reuse = match cipher_write.write_control(Flag::Fin).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "close-write on cipher stream failed");
                    false
                }
            };
            (copied, reuse)
        };

        let down_task = async {
            let mut buf = bytespool::acquire();
            let mut copied: u64 = 0;
            let outcome: Result<ReadStatus, CipherError> = loop {
                match cipher_read.read(&mut buf[..]).await {
                    Ok(ReadStatus::Data(n)) => {
                        if let Err(e) = plain_write.write_all(&buf[..n]).await {
                            break Err(CipherError::Io(e));
                        }
                        copied += n as u64;
                    }
                    Ok(status) => break Ok(status),
                    Err(e) => break Err(e),
                }
            };
            if let Err(e) = close_write(&mut plain_write).await {
                warn!(error = %e, "close-write on plaintext stream failed");
            }
            let reuse = match outcome {
                // Clean peer half-close.
                Ok(ReadStatus::Fin) => true,
                // RST, or an ACK outside negotiation.
                Ok(status) => {
                    debug!(?status, "cipher read terminated the session");
                    false
                }
                Err(e) => {
                    debug!(error = %e, "cipher read failed, draining");
                    drain_until_fin(&mut cipher_read, &mut buf[..], timeout).await
                }
            };
            (copied, reuse)
        };

        let ((up, reuse_up), (down, reuse_down)) = tokio::join!(up_task, down_task);
        (up, reuse_up, down, reuse_down)
    };

    let reuse = reuse_up && reuse_down && negotiate_reuse(entry.stream_mut(), timeout).await;
    if reuse {
        entry.stream_mut().reset_session();
        debug!(bytes_up = up, bytes_down = down, "cipher connection healthy, reusing");
    } else {
        entry.mark_unusable();
        info!(bytes_up = up, bytes_down = down, "cipher connection not reusable, discarding");
    }

    RelayStats { up, down }
}

/// After a read failure, keep reading under a deadline to see whether the
/// peer still delivers a clean FIN.
async fn drain_until_fin<S>(
    cipher_read: &mut CipherReadHalf<'_, S>,
    buf: &mut [u8],
    timeout: Duration,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    matches!(
        tokio::time::timeout(timeout, cipher_read.drain(buf)).await,
        Ok(Ok(ReadStatus::Fin))
    )
}

/// The two-way ACK exchange confirming a clean, reusable boundary:
/// write an ACK, then discard inbound bytes until a status arrives.
/// Reuse is granted iff the peer reciprocated within the deadline.
async fn negotiate_reuse<S>(cipher: &mut CipherStream<S>, timeout: Duration) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        cipher.write_control(Flag::Ack).await?;
        let mut buf = bytespool::acquire();
        cipher.drain(&mut buf[..]).await
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(ReadStatus::Ack)) => true,
        Ok(Ok(status)) => {
            debug!(?status, "reuse negotiation ended without ACK");
            false
        }
        Ok(Err(e)) => {
            debug!(error = %e, "reuse negotiation failed");
            false
        }
        Err(_) => {
            debug!("reuse negotiation timed out");
            false
        }
    }
}

/// Half-close the plaintext side so the local client observes EOF.
/// Benign termination errors are suppressed.
async fn close_write<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match writer.shutdown().await {
        Ok(()) => Ok(()),
        Err(e) if error_can_ignore(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

/// The fixed set of termination conditions that are not real failures
/// when shutting down a half-connection: I/O timeouts, broken pipe,
/// connection reset/aborted, endpoint not connected, endpoint shut down.
pub fn error_can_ignore(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    ) {
        return true;
    }
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::ESHUTDOWN) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio::io::{DuplexStream, duplex};

    use skiff_cipher::SessionKeys;
    use skiff_pool::{Connector, Pool, PoolConfig};

    /// Connector handing out a single prepared stream.
    struct OneShotConnector(Mutex<Option<CipherStream<DuplexStream>>>);

    impl OneShotConnector {
        fn new(stream: CipherStream<DuplexStream>) -> Self {
            Self(Mutex::new(Some(stream)))
        }
    }

    impl Connector for OneShotConnector {
        type Stream = CipherStream<DuplexStream>;

        fn connect(
            &self,
        ) -> Pin<Box<dyn Future<Output = io::Result<Self::Stream>> + Send + '_>> {
            let stream = self.0.lock().unwrap().take();
            Box::pin(async move {
                stream.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "exhausted"))
            })
        }
    }

    async fn entry_for(
        stream: CipherStream<DuplexStream>,
    ) -> (
        std::sync::Arc<Pool<OneShotConnector>>,
        PoolEntry<CipherStream<DuplexStream>>,
    ) {
        let pool = Pool::new(PoolConfig::default(), OneShotConnector::new(stream));
        let entry = pool.get().await.unwrap();
        (pool, entry)
    }

    #[test]
    fn benign_close_errors_are_classified() {
        for kind in [
            io::ErrorKind::TimedOut,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::NotConnected,
        ] {
            assert!(error_can_ignore(&io::Error::new(kind, "x")), "{kind:?}");
        }
        assert!(!error_can_ignore(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "x"
        )));
        #[cfg(unix)]
        assert!(error_can_ignore(&io::Error::from_raw_os_error(
            libc::ESHUTDOWN
        )));
    }

    #[tokio::test]
    async fn zero_byte_session_grants_reuse_on_ack() {
        let keys = SessionKeys::derive("relay test");
        let (upstream, peer_io) = duplex(64 * 1024);
        let cipher = CipherStream::client(upstream, &keys);

        // Peer: sees our FIN immediately, FINs back, then reciprocates ACK.
        let peer = tokio::spawn(async move {
            let mut peer = CipherStream::server(peer_io, &keys);
            let mut buf = [0u8; 1024];
            assert_eq!(peer.read(&mut buf).await.unwrap(), ReadStatus::Fin);
            peer.write_control(Flag::Fin).await.unwrap();
            assert_eq!(peer.drain(&mut buf).await.unwrap(), ReadStatus::Ack);
            peer.write_control(Flag::Ack).await.unwrap();
        });

        let (_pool, mut entry) = entry_for(cipher).await;
        let (mut local, mut plain) = duplex(1024);

        // Local client closes immediately without sending anything.
        local.shutdown().await.unwrap();

        let stats = relay(&mut plain, &mut entry, Duration::from_secs(1)).await;
        assert_eq!(stats, RelayStats { up: 0, down: 0 });
        assert!(!entry.is_unusable());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn missing_ack_denies_reuse() {
        let keys = SessionKeys::derive("relay test");
        let (upstream, peer_io) = duplex(64 * 1024);
        let cipher = CipherStream::client(upstream, &keys);

        // Peer FINs cleanly but never answers the ACK.
        let peer = tokio::spawn(async move {
            let mut peer = CipherStream::server(peer_io, &keys);
            let mut buf = [0u8; 1024];
            assert_eq!(peer.read(&mut buf).await.unwrap(), ReadStatus::Fin);
            peer.write_control(Flag::Fin).await.unwrap();
            assert_eq!(peer.drain(&mut buf).await.unwrap(), ReadStatus::Ack);
            // Hold the connection open without reciprocating.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (_pool, mut entry) = entry_for(cipher).await;
        let (mut local, mut plain) = duplex(1024);
        local.shutdown().await.unwrap();

        let stats = relay(&mut plain, &mut entry, Duration::from_millis(100)).await;
        assert_eq!(stats.total(), 0);
        assert!(entry.is_unusable());
        peer.abort();
    }
}
