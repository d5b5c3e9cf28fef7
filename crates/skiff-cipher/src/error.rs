//! Cipher stream error types.

use thiserror::Error;

/// Errors that can occur on a cipher stream.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame authentication failed")]
    BadSeal,

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("invalid frame flag: {0:#04x}")]
    InvalidFlag(u8),

    #[error("frame exceeds maximum sealed size: {0} bytes")]
    Oversized(usize),

    #[error("frame counter exhausted")]
    NonceExhausted,

    #[error("stream is half-closed for writing")]
    WriteAfterFin,
}

impl CipherError {
    /// True if the underlying transport reached EOF mid-frame.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
