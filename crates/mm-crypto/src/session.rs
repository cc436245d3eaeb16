use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::SharedSecret;

/// A sealed `STREAM_DATA` envelope: the 12-byte nonce used for this frame
/// plus the AEAD ciphertext with its 16-byte tag appended (what
/// `chacha20poly1305` returns from `encrypt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; 12],
    pub ciphertext_and_tag: Vec<u8>,
}

/// Derive the per-stream AEAD key from an ECDH shared secret.
///
/// `info = request_id (8B BE) || ingress_pub (32B) || exit_pub (32B)`,
/// per §4.2. `is_initiator` selects which side of the nonce space (even vs.
/// odd multiples of the per-direction counter) this endpoint writes into.
pub fn derive_session_key(
    shared: &SharedSecret,
    request_id: u64,
    ingress_pub: [u8; 32],
    exit_pub: [u8; 32],
    is_initiator: bool,
) -> SessionKey {
    let mut info = Vec::with_capacity(8 + 32 + 32);
    info.extend_from_slice(&request_id.to_be_bytes());
    info.extend_from_slice(&ingress_pub);
    info.extend_from_slice(&exit_pub);

    let hk = Hkdf::<Sha256>::new(None, &shared.0);
    let mut okm = [0u8; 32];
    hk.expand(&info, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");

    let key = *Key::from_slice(&okm);
    okm.zeroize();

    SessionKey {
        key,
        is_initiator,
        send_counter: 0,
        recv_high_water: None,
    }
}

/// A derived per-stream AEAD key plus the direction-scoped nonce counters
/// required to prevent nonce reuse without coordination (§4.2): the
/// initiator uses even nonces (`2n`), the responder odd (`2n+1`).
pub struct SessionKey {
    key: Key,
    is_initiator: bool,
    send_counter: u64,
    recv_high_water: Option<u64>,
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

fn nonce_bytes(value: u64) -> [u8; 12] {
    let mut bytes = [0u8; 12];
    bytes[4..].copy_from_slice(&value.to_be_bytes());
    bytes
}

fn nonce_value(nonce: &[u8; 12]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&nonce[4..]);
    u64::from_be_bytes(buf)
}

impl SessionKey {
    /// Encrypt `plaintext`, advancing this side's send counter. The caller
    /// is responsible for transmitting `nonce` alongside the ciphertext —
    /// the wire envelope is `nonce || ciphertext || tag` (§4.1).
    pub fn seal(&mut self, plaintext: &[u8]) -> Sealed {
        let value = if self.is_initiator {
            2 * self.send_counter
        } else {
            2 * self.send_counter + 1
        };
        self.send_counter += 1;

        let nonce = nonce_bytes(value);
        let cipher = ChaCha20Poly1305::new(&self.key);
        let ciphertext_and_tag = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .expect("chacha20poly1305 encryption of bounded-size plaintext cannot fail");

        Sealed {
            nonce,
            ciphertext_and_tag,
        }
    }

    /// Decrypt and authenticate a received envelope. Rejects non-monotonic
    /// nonces (`ReplayDetected`) and failed AEAD tags (`AeadFailure`); both
    /// are fatal for the stream per §7.
    pub fn open(&mut self, nonce: [u8; 12], ciphertext_and_tag: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let value = nonce_value(&nonce);
        let expected_remote_initiator = !self.is_initiator;
        let is_even = value % 2 == 0;
        let from_initiator = is_even;
        if from_initiator != expected_remote_initiator {
            return Err(CryptoError::ReplayDetected);
        }
        if let Some(high_water) = self.recv_high_water {
            if value <= high_water {
                return Err(CryptoError::ReplayDetected);
            }
        }

        let cipher = ChaCha20Poly1305::new(&self.key);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext_and_tag)
            .map_err(|_| CryptoError::AeadFailure)?;

        self.recv_high_water = Some(value);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;
    use rand::rngs::OsRng;

    fn make_pair() -> (SessionKey, SessionKey) {
        let mut rng = OsRng;
        let (priv_a, pub_a) = generate_keypair(&mut rng);
        let (priv_b, pub_b) = generate_keypair(&mut rng);
        let shared_a = priv_a.diffie_hellman(&pub_b);
        let shared_b = priv_b.diffie_hellman(&pub_a);

        let request_id = 99;
        let ingress_pub = pub_a.to_bytes();
        let exit_pub = pub_b.to_bytes();
        let initiator = derive_session_key(&shared_a, request_id, ingress_pub, exit_pub, true);
        let responder = derive_session_key(&shared_b, request_id, ingress_pub, exit_pub, false);
        (initiator, responder)
    }

    #[test]
    fn seal_open_round_trip_both_directions() {
        let (mut initiator, mut responder) = make_pair();

        let sealed = initiator.seal(b"ping");
        let opened = responder.open(sealed.nonce, &sealed.ciphertext_and_tag).unwrap();
        assert_eq!(opened, b"ping");

        let sealed_back = responder.seal(b"pong");
        let opened_back = initiator
            .open(sealed_back.nonce, &sealed_back.ciphertext_and_tag)
            .unwrap();
        assert_eq!(opened_back, b"pong");
    }

    #[test]
    fn bit_flip_fails_authentication() {
        let (mut initiator, mut responder) = make_pair();
        let mut sealed = initiator.seal(b"data");
        sealed.ciphertext_and_tag[0] ^= 0x01;
        let err = responder
            .open(sealed.nonce, &sealed.ciphertext_and_tag)
            .unwrap_err();
        assert_eq!(err, CryptoError::AeadFailure);
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let (mut initiator, mut responder) = make_pair();
        let sealed = initiator.seal(b"one");
        responder
            .open(sealed.nonce, &sealed.ciphertext_and_tag)
            .unwrap();
        // Replay the exact same envelope again.
        let err = responder
            .open(sealed.nonce, &sealed.ciphertext_and_tag)
            .unwrap_err();
        assert_eq!(err, CryptoError::ReplayDetected);
    }

    #[test]
    fn out_of_order_but_increasing_nonces_are_accepted() {
        let (mut initiator, mut responder) = make_pair();
        let first = initiator.seal(b"a");
        let second = initiator.seal(b"b");
        // Deliver second before first is fine as long as both are newer
        // than the last accepted value when they individually arrive; here
        // we just confirm both verify independently and counters advance.
        responder
            .open(second.nonce, &second.ciphertext_and_tag)
            .unwrap();
        let err = responder.open(first.nonce, &first.ciphertext_and_tag);
        assert!(err.is_err(), "stale nonce after a newer one must fail");
    }
}
