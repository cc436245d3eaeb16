use thiserror::Error;

/// Failures parsing the RFC1928 handshake or request that never reach
/// `mm-stream` — malformed bytes from the client, not a routing/dial
/// failure. `mm-socks5` is a process-boundary crate, so `thiserror` fits
/// here (§4.11's error-handling convention).
#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("client offered no acceptable auth method")]
    NoAcceptableAuthMethod,
    #[error("username/password auth failed")]
    AuthFailed,
    #[error("unsupported socks version: {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),
    #[error("bind command is not supported (non-goal)")]
    BindUnsupported,
    #[error("udp associate is not supported beyond request parsing")]
    UdpAssociateUnsupported,
    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),
    #[error("domain name is not valid utf-8")]
    BadDomain,
    #[error("connection closed before a complete message was read")]
    UnexpectedEof,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The reply field of a SOCKS5 `REP` byte (RFC1928 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NotAllowedByRuleset = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Maps a stream-open failure to the SOCKS5 reply code the client expects
/// (§4.9: "0x03 network unreachable, 0x04 host unreachable, 0x05 refused,
/// 0x06 TTL expired, 0x01 general failure"). `NotAllowed` isn't named in
/// that list explicitly but RFC1928 has a dedicated code for exactly this
/// case, so it's used here rather than folding it into general failure.
pub fn reply_code_for(err: mm_stream::StreamError) -> ReplyCode {
    use mm_stream::StreamError;
    match err {
        StreamError::NoRoute | StreamError::HostUnreachable | StreamError::DnsError => ReplyCode::HostUnreachable,
        StreamError::NetworkUnreachable => ReplyCode::NetworkUnreachable,
        StreamError::ConnectionRefused => ReplyCode::ConnectionRefused,
        StreamError::TtlExceeded => ReplyCode::TtlExpired,
        StreamError::NotAllowed | StreamError::ExitDisabled => ReplyCode::NotAllowedByRuleset,
        StreamError::OpenTimeout
        | StreamError::ConnectionTimeout
        | StreamError::ResourceLimit
        | StreamError::StreamNotFound
        | StreamError::AeadFailure
        | StreamError::GeneralFailure => ReplyCode::GeneralFailure,
    }
}
