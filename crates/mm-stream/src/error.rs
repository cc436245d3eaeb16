use mm_protocol::ErrorCode;

/// Stream-lifecycle failures. Each variant knows the wire [`ErrorCode`] it
/// corresponds to, so `STREAM_OPEN_ERR`/`STREAM_RESET` construction never
/// hand-picks a numeric constant inline (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("no route to destination")]
    NoRoute,
    #[error("ttl exceeded before reaching the exit")]
    TtlExceeded,
    #[error("stream open timed out waiting for an ack")]
    OpenTimeout,
    #[error("too many streams or pending opens")]
    ResourceLimit,
    #[error("stream id not found in the local registry")]
    StreamNotFound,
    #[error("destination not permitted by this exit's routes")]
    NotAllowed,
    #[error("connection refused by destination")]
    ConnectionRefused,
    #[error("connection to destination timed out")]
    ConnectionTimeout,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("dns resolution failed")]
    DnsError,
    #[error("exit handling is disabled on this agent")]
    ExitDisabled,
    #[error("aead authentication failed, stream reset")]
    AeadFailure,
    #[error("general failure")]
    GeneralFailure,
}

impl StreamError {
    pub fn to_wire_code(self) -> ErrorCode {
        match self {
            StreamError::NoRoute => ErrorCode::NoRoute,
            StreamError::ConnectionRefused => ErrorCode::ConnectionRefused,
            StreamError::OpenTimeout | StreamError::ConnectionTimeout => ErrorCode::ConnectionTimeout,
            StreamError::TtlExceeded => ErrorCode::TtlExceeded,
            StreamError::HostUnreachable => ErrorCode::HostUnreachable,
            StreamError::NetworkUnreachable => ErrorCode::NetworkUnreachable,
            StreamError::DnsError => ErrorCode::DnsError,
            StreamError::ExitDisabled => ErrorCode::ExitDisabled,
            StreamError::ResourceLimit => ErrorCode::ResourceLimit,
            StreamError::NotAllowed => ErrorCode::NotAllowed,
            StreamError::StreamNotFound
            | StreamError::AeadFailure
            | StreamError::GeneralFailure => ErrorCode::GeneralFailure,
        }
    }
}
