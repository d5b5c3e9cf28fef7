//! Core constants and shared primitives for skiff crates.
//!
//! This crate provides:
//! - Default configuration values
//! - The fixed-size relay buffer pool

pub mod bytespool;
pub mod defaults;

pub use defaults::*;

/// Project name.
pub const PROJECT_NAME: &str = "skiff";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
