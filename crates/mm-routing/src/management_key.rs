//! Opt-in encryption of `NODE_INFO_ADVERTISE` payloads and route paths
//! (§9 Open Questions): deployments that don't want intermediate agents to
//! read domain/presence/forward-key route data in the clear can configure a
//! shared `ManagementKey`, derived from a passphrase or provisioned out of
//! band, and every hop encrypts the opaque blob before relaying it.
//!
//! This is separate from per-stream end-to-end encryption (`mm-crypto`'s
//! `SessionKey`): a management key is shared by the whole mesh rather than
//! negotiated per stream, so it uses a plain AEAD call with a random nonce
//! rather than the direction-counted nonce scheme streams need.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{CryptoRng, RngCore};

/// A symmetric key shared by every agent in a deployment that opts into
/// encrypting route-advertisement payloads.
pub struct ManagementKey {
    cipher: ChaCha20Poly1305,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ManagementKeyError {
    #[error("ciphertext too short to contain a nonce")]
    Truncated,
    #[error("AEAD authentication failed")]
    AeadFailure,
}

impl ManagementKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ManagementKey {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&bytes)),
        }
    }

    /// Encrypt `plaintext` under a freshly drawn random nonce, returning
    /// `nonce || ciphertext || tag`.
    pub fn seal<R: RngCore + CryptoRng>(&self, rng: &mut R, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce_bytes = [0u8; 12];
        rng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut out = Vec::with_capacity(12 + plaintext.len() + 16);
        out.extend_from_slice(&nonce_bytes);
        out.extend(
            self.cipher
                .encrypt(nonce, plaintext)
                .expect("chacha20poly1305 encryption of bounded-size plaintext cannot fail"),
        );
        out
    }

    pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>, ManagementKeyError> {
        if envelope.len() < 12 {
            return Err(ManagementKeyError::Truncated);
        }
        let (nonce_bytes, ciphertext) = envelope.split_at(12);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| ManagementKeyError::AeadFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn seal_open_round_trip() {
        let key = ManagementKey::from_bytes([7u8; 32]);
        let mut rng = OsRng;
        let envelope = key.seal(&mut rng, b"route data");
        assert_eq!(key.open(&envelope).unwrap(), b"route data");
    }

    #[test]
    fn tampered_envelope_fails() {
        let key = ManagementKey::from_bytes([7u8; 32]);
        let mut rng = OsRng;
        let mut envelope = key.seal(&mut rng, b"route data");
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;
        assert_eq!(key.open(&envelope).unwrap_err(), ManagementKeyError::AeadFailure);
    }
}
