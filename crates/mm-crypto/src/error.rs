/// Cryptographic operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// AEAD tag verification failed (bit flip, wrong key, or truncated
    /// ciphertext). Fatal for the stream — the caller should reset it.
    #[error("AEAD authentication failed")]
    AeadFailure,
    /// A received nonce was not strictly greater than the last one accepted
    /// for its direction. Fatal for the stream.
    #[error("replay detected: nonce did not strictly increase")]
    ReplayDetected,
    /// `STREAM_OPEN` carried an all-zero public key, which is rejected as a
    /// strict-encryption-required signal rather than a usable key.
    #[error("peer presented a zero public key")]
    ZeroPublicKey,
}
