//! Virtual stream manager (C7) and per-peer fairness scheduler (C8).
//!
//! This crate owns stream lifecycle, transit forwarding, and endpoint AEAD
//! sealing/opening. It has no compile-time dependency on `mm-peer` or
//! `mm-exit`: callers hand it [`PeerSink`]/[`StreamSink`]/[`ExitHandler`]
//! trait objects instead.

mod error;
mod fairness;
mod forward;
mod ids;
mod manager;

pub use error::StreamError;
pub use fairness::FairnessQueue;
pub use forward::{ForwardTable, StreamKey};
pub use ids::{RequestIdAllocator, StreamIdAllocator};
pub use manager::{
    ExitHandler, ExitOpened, PeerSink, StreamHandle, StreamManager, StreamSink,
    MAX_PENDING_OPENS, MAX_STREAMS_PER_PEER, MAX_STREAMS_TOTAL, STREAM_OPEN_TIMEOUT,
};
