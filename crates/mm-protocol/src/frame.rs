use bytes::Bytes;

/// Fixed header size in bytes: type(1) + flags(1) + length(4) + stream_id(8).
pub const HEADER_LEN: usize = 14;

/// Maximum payload length a single frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 16_384;

/// Per-frame flag bits. Only meaningful on `STREAM_CLOSE` today but the bit
/// positions are reserved wire-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const FIN_WRITE: Flags = Flags(0b0000_0001);
    pub const FIN_READ: Flags = Flags(0b0000_0010);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

/// Frame type numbering. Stable and frozen across agent versions; unknown
/// byte values round-trip through [`FrameType::Unknown`] rather than
/// failing decode, so a newer peer's frames never crash an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    StreamOpen,
    StreamOpenAck,
    StreamOpenErr,
    StreamData,
    StreamClose,
    StreamReset,
    RouteAdvertise,
    RouteWithdraw,
    NodeInfoAdvertise,
    PeerHello,
    PeerHelloAck,
    Keepalive,
    KeepaliveAck,
    ControlRequest,
    ControlResponse,
    Unknown(u8),
}

impl FrameType {
    pub fn code(self) -> u8 {
        match self {
            FrameType::StreamOpen => 0x01,
            FrameType::StreamOpenAck => 0x02,
            FrameType::StreamOpenErr => 0x03,
            FrameType::StreamData => 0x04,
            FrameType::StreamClose => 0x05,
            FrameType::StreamReset => 0x06,
            FrameType::RouteAdvertise => 0x10,
            FrameType::RouteWithdraw => 0x11,
            FrameType::NodeInfoAdvertise => 0x12,
            FrameType::PeerHello => 0x20,
            FrameType::PeerHelloAck => 0x21,
            FrameType::Keepalive => 0x22,
            FrameType::KeepaliveAck => 0x23,
            FrameType::ControlRequest => 0x24,
            FrameType::ControlResponse => 0x25,
            FrameType::Unknown(b) => b,
        }
    }

    pub fn from_code(b: u8) -> Self {
        match b {
            0x01 => FrameType::StreamOpen,
            0x02 => FrameType::StreamOpenAck,
            0x03 => FrameType::StreamOpenErr,
            0x04 => FrameType::StreamData,
            0x05 => FrameType::StreamClose,
            0x06 => FrameType::StreamReset,
            0x10 => FrameType::RouteAdvertise,
            0x11 => FrameType::RouteWithdraw,
            0x12 => FrameType::NodeInfoAdvertise,
            0x20 => FrameType::PeerHello,
            0x21 => FrameType::PeerHelloAck,
            0x22 => FrameType::Keepalive,
            0x23 => FrameType::KeepaliveAck,
            0x24 => FrameType::ControlRequest,
            0x25 => FrameType::ControlResponse,
            other => FrameType::Unknown(other),
        }
    }

    /// Whether this frame type is addressed to stream 0 (peer-level control)
    /// rather than a specific virtual stream.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            FrameType::RouteAdvertise
                | FrameType::RouteWithdraw
                | FrameType::NodeInfoAdvertise
                | FrameType::PeerHello
                | FrameType::PeerHelloAck
                | FrameType::Keepalive
                | FrameType::KeepaliveAck
                | FrameType::ControlRequest
                | FrameType::ControlResponse
        )
    }
}

/// The fixed 14-byte frame header, decoded independently of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub flags: Flags,
    pub length: u32,
    pub stream_id: u64,
}

/// A full frame: header plus its raw payload bytes.
///
/// `Frame` does not interpret the payload — see [`crate::payload::Payload`]
/// for typed parsing. Keeping the two separate means transit hops can
/// forward `STREAM_DATA` frames without ever constructing a typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, flags: Flags, stream_id: u64, payload: Bytes) -> Self {
        Frame {
            header: FrameHeader {
                frame_type,
                flags,
                length: payload.len() as u32,
                stream_id,
            },
            payload,
        }
    }

    pub fn control(frame_type: FrameType, payload: Bytes) -> Self {
        Self::new(frame_type, Flags::empty(), 0, payload)
    }
}
