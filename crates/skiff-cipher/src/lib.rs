//! Framed, AEAD-encrypted duplex streams with in-band control flags.
//!
//! A [`CipherStream`] wraps any reliable byte stream with an
//! XChaCha20-Poly1305 frame codec. Each frame seals a one-byte flag plus
//! payload; FIN/RST/ACK control frames delimit sessions and drive the
//! connection-reuse handshake, and surface to readers as typed
//! [`ReadStatus`] values rather than payload bytes.

pub mod error;
pub mod frame;
pub mod key;
pub mod nonce;
pub mod stream;

pub use error::CipherError;
pub use frame::Flag;
pub use key::SessionKeys;
pub use nonce::Direction;
pub use stream::{CipherReadHalf, CipherStream, CipherWriteHalf, ReadStatus};
