use thiserror::Error;

/// Failures resolving or dialing an exit-side destination. Only used
/// internally to classify a failure before it's turned into the
/// `mm_stream::StreamError` the stream manager actually propagates —
/// `mm-exit` is a process-boundary crate, so `thiserror` fits here unlike
/// the hand-rolled enums further down the stack.
#[derive(Debug, Error)]
pub enum ExitError {
    #[error("destination not permitted by exit allow-list")]
    NotAllowed,
    #[error("dns resolution failed: {0}")]
    Dns(std::io::Error),
    #[error("dns resolution timed out")]
    DnsTimeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection attempt timed out")]
    ConnectionTimeout,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("invalid ephemeral public key")]
    BadEphemeralKey,
    #[error("io error: {0}")]
    Io(std::io::Error),
}

impl From<&ExitError> for mm_stream::StreamError {
    fn from(e: &ExitError) -> Self {
        match e {
            ExitError::NotAllowed => mm_stream::StreamError::NotAllowed,
            ExitError::Dns(_) | ExitError::DnsTimeout => mm_stream::StreamError::DnsError,
            ExitError::ConnectionRefused => mm_stream::StreamError::ConnectionRefused,
            ExitError::ConnectionTimeout => mm_stream::StreamError::ConnectionTimeout,
            ExitError::HostUnreachable => mm_stream::StreamError::HostUnreachable,
            ExitError::NetworkUnreachable => mm_stream::StreamError::NetworkUnreachable,
            ExitError::BadEphemeralKey => mm_stream::StreamError::AeadFailure,
            ExitError::Io(_) => mm_stream::StreamError::GeneralFailure,
        }
    }
}
