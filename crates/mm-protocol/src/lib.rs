//! Binary frame codec and typed payloads for the Muti Metroo wire protocol.
//!
//! Every control and data message on the wire is a [`Frame`]: a 14-byte
//! fixed header followed by a payload of at most [`MAX_PAYLOAD_LEN`] bytes.
//! The header layout, frame type numbering, and payload shapes are frozen
//! (see `FrameType`) — this crate must stay wire-compatible across agent
//! versions.

mod agent_id;
mod codec;
mod error;
mod frame;
pub mod payload;

pub use agent_id::{AgentId, ParseAgentIdError};
pub use codec::{decode, encode, encode_frame, FrameCodec};
pub use error::{DecodeError, EncodeError};
pub use frame::{Flags, Frame, FrameHeader, FrameType, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use payload::{ErrorCode, Payload};
