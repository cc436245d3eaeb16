use std::fmt;

/// Frame encoding failures. These are programmer/caller errors (the payload
/// being encoded is too large) rather than wire-observed conditions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload of {0} bytes exceeds the {max} byte limit", max = super::MAX_PAYLOAD_LEN)]
    FrameTooLarge(usize),
}

/// Frame decoding failures observed while parsing bytes off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// `length` in the header exceeds [`super::MAX_PAYLOAD_LEN`].
    FrameTooLarge(u32),
    /// Fewer bytes are buffered than the header declares; not fatal, the
    /// caller should wait for more data.
    Truncated,
    /// `stream_id == 0` was used for a frame type that requires a non-zero
    /// stream id (or vice versa).
    InvalidStreamId { frame_type: u8, stream_id: u64 },
    /// An address-family byte in a payload did not match any known variant.
    InvalidAddressFamily(u8),
    /// A length-prefixed string was not valid UTF-8.
    BadUtf8,
    /// The payload was shorter than its own length-prefixed fields imply.
    MalformedPayload(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::FrameTooLarge(len) => {
                write!(f, "frame length {len} exceeds {}", super::MAX_PAYLOAD_LEN)
            }
            DecodeError::Truncated => write!(f, "buffer does not yet contain a full frame"),
            DecodeError::InvalidStreamId {
                frame_type,
                stream_id,
            } => write!(
                f,
                "invalid stream_id {stream_id} for frame type 0x{frame_type:02x}"
            ),
            DecodeError::InvalidAddressFamily(b) => write!(f, "invalid address family byte {b}"),
            DecodeError::BadUtf8 => write!(f, "payload field is not valid UTF-8"),
            DecodeError::MalformedPayload(what) => write!(f, "malformed payload: {what}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for std::io::Error {
    fn from(e: DecodeError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    }
}
