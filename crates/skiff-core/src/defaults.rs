//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Relay buffer size. The maximum cipher frame payload is 16 KiB, so a
/// 20 KiB buffer always absorbs one full frame plus header overhead.
pub const RELAY_BUFFER_SIZE: usize = 20 * 1024;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default relay timeout in seconds, applied to the post-error drain and
/// the ACK reuse negotiation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default TLS handshake timeout in seconds.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Connection Pool Defaults
// ============================================================================

/// Default entries pre-dialed at startup.
pub const DEFAULT_POOL_INITIAL: usize = 10;
/// Default hard upper bound on concurrent pool entries.
pub const DEFAULT_POOL_MAX: usize = 50;
/// Default max idle entries retained in the pool.
pub const DEFAULT_POOL_MAX_IDLE: usize = 10;
/// Default idle entry TTL in seconds.
pub const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 5 * 60;
/// Default absolute entry TTL in seconds.
pub const DEFAULT_POOL_MAX_LIFETIME_SECS: u64 = 30 * 60;
/// Default interval for the background pool sweeper in seconds.
pub const DEFAULT_POOL_SWEEP_INTERVAL_SECS: u64 = 30;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default TCP Keep-Alive interval in seconds (0 = disabled).
pub const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 300;

// ============================================================================
// Client Defaults
// ============================================================================

/// Default local SOCKS5 listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:1080";
/// Interval between aggregate byte-count log lines in seconds.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;
