//! Session key derivation.
//!
//! Both endpoints derive the same pair of direction keys from the shared
//! password with HKDF-SHA256, so no key exchange happens on the wire.
//! Key material is zeroized on drop.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::nonce::Direction;

/// AEAD key size (XChaCha20-Poly1305).
pub const KEY_SIZE: usize = 32;

const HKDF_SALT: &[u8] = b"skiff-session-v1";
const INFO_CLIENT_TO_SERVER: &[u8] = b"client-to-server";
const INFO_SERVER_TO_CLIENT: &[u8] = b"server-to-client";

/// Per-direction session keys derived from the shared password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    client_to_server: [u8; KEY_SIZE],
    server_to_client: [u8; KEY_SIZE],
}

impl SessionKeys {
    /// Derive both direction keys from the shared password.
    pub fn derive(password: &str) -> Self {
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), password.as_bytes());

        let mut client_to_server = [0u8; KEY_SIZE];
        let mut server_to_client = [0u8; KEY_SIZE];
        // Expansion only fails for oversized outputs; KEY_SIZE is valid.
        hkdf.expand(INFO_CLIENT_TO_SERVER, &mut client_to_server)
            .expect("KEY_SIZE is a valid HKDF output length");
        hkdf.expand(INFO_SERVER_TO_CLIENT, &mut server_to_client)
            .expect("KEY_SIZE is a valid HKDF output length");

        Self {
            client_to_server,
            server_to_client,
        }
    }

    /// Key material for the given direction.
    pub fn key(&self, direction: Direction) -> &[u8; KEY_SIZE] {
        match direction {
            Direction::ClientToServer => &self.client_to_server,
            Direction::ServerToClient => &self.server_to_client,
        }
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = SessionKeys::derive("correct horse");
        let b = SessionKeys::derive("correct horse");
        assert_eq!(
            a.key(Direction::ClientToServer),
            b.key(Direction::ClientToServer)
        );
        assert_eq!(
            a.key(Direction::ServerToClient),
            b.key(Direction::ServerToClient)
        );
    }

    #[test]
    fn directions_use_distinct_keys() {
        let keys = SessionKeys::derive("correct horse");
        assert_ne!(
            keys.key(Direction::ClientToServer),
            keys.key(Direction::ServerToClient)
        );
    }

    #[test]
    fn passwords_produce_distinct_keys() {
        let a = SessionKeys::derive("alpha");
        let b = SessionKeys::derive("bravo");
        assert_ne!(
            a.key(Direction::ClientToServer),
            b.key(Direction::ClientToServer)
        );
    }
}
