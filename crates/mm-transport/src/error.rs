use std::fmt;

/// Transport-level errors, common across the QUIC/h2/WebSocket adapters.
///
/// Kept as a hand-rolled enum (rather than `thiserror`) so call sites close
/// to the protocol layer can match on specific variants without pulling in
/// the derive machinery, matching the convention used throughout the
/// protocol/routing/crypto crates.
#[derive(Debug)]
pub enum TransportError {
    Dial(String),
    Listen(String),
    ConnectionClosed,
    StreamLimitReached,
    Io(std::io::Error),
    Tls(String),
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Dial(s) => write!(f, "dial failed: {s}"),
            TransportError::Listen(s) => write!(f, "listen failed: {s}"),
            TransportError::ConnectionClosed => write!(f, "connection closed"),
            TransportError::StreamLimitReached => write!(f, "stream limit reached"),
            TransportError::Io(e) => write!(f, "io error: {e}"),
            TransportError::Tls(s) => write!(f, "tls error: {s}"),
            TransportError::Protocol(s) => write!(f, "protocol error: {s}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}
