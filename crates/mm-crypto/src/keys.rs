use rand_core::{CryptoRng, RngCore};

use crate::error::CryptoError;

/// An X25519 private scalar. Zeroized on drop (inherited from
/// `x25519_dalek::StaticSecret`, which is `ZeroizeOnDrop`).
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// An X25519 public key (32 bytes), safe to copy and send over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PrivateKey(x25519_dalek::StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Raw scalar bytes, for persisting to disk (§6 `agent_key`). Callers
    /// are responsible for zeroizing/permissioning the storage.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// ECDH: compute the shared secret with a peer's public key. The result
    /// must never be reused beyond deriving a session key with it.
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> SharedSecret {
        SharedSecret(self.0.diffie_hellman(&their_public.0).to_bytes())
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.0.as_bytes().iter().all(|b| *b == 0)
    }

    /// Reject an all-zero key per §4.2: a zero public key in `STREAM_OPEN`
    /// signals strict-encryption-required and must not be used as a key.
    pub fn require_nonzero(self) -> Result<Self, CryptoError> {
        if self.is_zero() {
            Err(CryptoError::ZeroPublicKey)
        } else {
            Ok(self)
        }
    }
}

/// Raw ECDH output. Zeroized on drop; never cloned or stored beyond the
/// immediate `derive_session_key` call.
pub struct SharedSecret(pub(crate) [u8; 32]);

impl Drop for SharedSecret {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.0);
    }
}

/// Generate a fresh X25519 keypair from the supplied RNG. Callers pass the
/// RNG explicitly (`rand::rngs::OsRng` in production, a seeded RNG in
/// tests) — there is no ambient global RNG in this crate.
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (PrivateKey, PublicKey) {
    let secret = x25519_dalek::StaticSecret::random_from_rng(rng);
    let public = PublicKey(x25519_dalek::PublicKey::from(&secret));
    (PrivateKey(secret), public)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn ecdh_agrees_between_both_sides() {
        let mut rng = OsRng;
        let (priv_a, pub_a) = generate_keypair(&mut rng);
        let (priv_b, pub_b) = generate_keypair(&mut rng);

        let shared_a = priv_a.diffie_hellman(&pub_b);
        let shared_b = priv_b.diffie_hellman(&pub_a);
        assert_eq!(shared_a.0, shared_b.0);
    }

    #[test]
    fn zero_public_key_is_rejected() {
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert!(zero.is_zero());
        assert_eq!(
            zero.require_nonzero().unwrap_err(),
            CryptoError::ZeroPublicKey
        );
    }
}
