//! # skiff
//!
//! A client-side encrypted forwarding proxy: local SOCKS5 connections
//! are relayed over long-lived, pooled, AEAD-framed TCP connections to a
//! remote relay server.
//!
//! ## Crates
//!
//! - [`skiff_core`] - Default constants and the relay buffer pool
//! - [`skiff_cipher`] - Framed AEAD cipher stream with FIN/RST/ACK flags
//! - [`skiff_pool`] - Bounded pool of live upstream transports
//! - [`skiff_client`] - SOCKS5 acceptor, relay orchestrator, CLI

pub use skiff_cipher as cipher;
pub use skiff_client as client;
pub use skiff_core as core;
pub use skiff_pool as pool;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use skiff_cipher::{CipherStream, Flag, ReadStatus, SessionKeys};
    pub use skiff_client::{ClientArgs, ClientConfig, ClientError, load_client_config, run};
    pub use skiff_pool::{Connector, Pool, PoolConfig, PoolEntry};
}
