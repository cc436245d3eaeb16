//! Peer connection state machine (§4.6): `PEER_HELLO` handshake, keepalive,
//! reconnect backoff, and the writer-side fairness-scheduled frame sink.
//!
//! Each connected peer is driven by one [`connection::PeerConnection`] task,
//! closing over a [`routing_context::RoutingContext`] shared with every
//! other peer task in the process so route installs and stream dispatch
//! land in the same tables no matter which peer a frame arrived from.

mod backoff;
mod error;
mod handshake;
mod registry;
mod routing_context;
mod wire;
mod writer;

pub mod connection;

pub use backoff::{Backoff, BackoffConfig};
pub use error::PeerError;
pub use handshake::{accept_handshake, dial_handshake, HandshakeOutcome, HANDSHAKE_TIMEOUT};
pub use registry::PeerRegistry;
pub use routing_context::RoutingContext;
pub use writer::PeerWriterHandle;
