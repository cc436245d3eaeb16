use std::fmt;

/// Failures establishing or maintaining a peer connection (§4.6). Hand-rolled
/// rather than `thiserror` — this is a library crate, not a process boundary.
#[derive(Debug)]
pub enum PeerError {
    Dial(mm_transport::TransportError),
    Io(std::io::Error),
    Decode(mm_protocol::DecodeError),
    Encode(mm_protocol::EncodeError),
    HandshakeTimeout,
    VersionMismatch { ours: u16, theirs: u16 },
    UnexpectedAgentId { expected: mm_protocol::AgentId, got: mm_protocol::AgentId },
    ConnectionClosed,
    KeepaliveTimeout,
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::Dial(e) => write!(f, "dial failed: {e}"),
            PeerError::Io(e) => write!(f, "io error: {e}"),
            PeerError::Decode(e) => write!(f, "frame decode error: {e}"),
            PeerError::Encode(e) => write!(f, "frame encode error: {e}"),
            PeerError::HandshakeTimeout => write!(f, "peer_hello handshake timed out"),
            PeerError::VersionMismatch { ours, theirs } => {
                write!(f, "protocol version mismatch: ours={ours} theirs={theirs}")
            }
            PeerError::UnexpectedAgentId { expected, got } => {
                write!(f, "unexpected agent id in peer_hello: expected {expected}, got {got}")
            }
            PeerError::ConnectionClosed => write!(f, "connection closed"),
            PeerError::KeepaliveTimeout => write!(f, "keepalive ack not received in time"),
        }
    }
}

impl std::error::Error for PeerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeerError::Dial(e) => Some(e),
            PeerError::Io(e) => Some(e),
            PeerError::Decode(e) => Some(e),
            PeerError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<mm_transport::TransportError> for PeerError {
    fn from(e: mm_transport::TransportError) -> Self {
        PeerError::Dial(e)
    }
}

impl From<std::io::Error> for PeerError {
    fn from(e: std::io::Error) -> Self {
        PeerError::Io(e)
    }
}

impl From<mm_protocol::DecodeError> for PeerError {
    fn from(e: mm_protocol::DecodeError) -> Self {
        PeerError::Decode(e)
    }
}

impl From<mm_protocol::EncodeError> for PeerError {
    fn from(e: mm_protocol::EncodeError) -> Self {
        PeerError::Encode(e)
    }
}
