//! End-to-end cryptography for Muti Metroo streams.
//!
//! Ingress and exit agents perform an ephemeral X25519 key exchange per
//! stream open; the derived session key seals every `STREAM_DATA` payload
//! with ChaCha20-Poly1305. Transit hops never touch any of this — they only
//! ever see ciphertext (see `mm-stream`'s forward table).

mod error;
mod keys;
mod session;

pub use error::CryptoError;
pub use keys::{generate_keypair, PrivateKey, PublicKey};
pub use session::{derive_session_key, Sealed, SessionKey};
