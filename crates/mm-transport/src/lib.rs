//! Transport abstraction (§4.5): a `Transport`/`Connection`/`ByteStream`
//! trait family with three concrete adapters, each gated behind a Cargo
//! feature so a deployment only pulls in the crates it actually dials with.
//!
//! `mm-peer` never talks to `quinn`/`h2`/`tokio-tungstenite` directly; it
//! only sees these traits, so adding a fourth transport later is a matter of
//! adding another adapter module and feature flag.

mod error;

#[cfg(feature = "h2-transport")]
pub mod h2_transport;
#[cfg(feature = "quic")]
pub mod quic;
#[cfg(any(feature = "h2-transport", feature = "ws-transport"))]
mod tls;
#[cfg(feature = "ws-transport")]
pub mod ws;

pub use error::TransportError;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte-oriented duplex stream obtained from a [`Connection`].
///
/// Blanket-implemented for anything that is already `AsyncRead + AsyncWrite
/// + Unpin + Send`, so adapters hand back ordinary tokio I/O types wrapped
/// in a `Box<dyn ByteStream>`.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// An established connection to a remote agent.
#[async_trait]
pub trait Connection: Send + Sync {
    /// `true` for transports that can carry more than one logical byte
    /// stream concurrently (QUIC). `false` for the single-stream h2 and
    /// WebSocket adapters, which rely on `mm-stream`'s fairness scheduler
    /// (C8) to multiplex several logical streams over the one byte stream.
    fn multiplexed(&self) -> bool;

    /// Open a new outbound substream. Only meaningful when
    /// [`Connection::multiplexed`] is `true`; single-stream adapters return
    /// their one shared stream the first time this is called and
    /// `TransportError::StreamLimitReached` after.
    async fn open_stream(&self) -> Result<Box<dyn ByteStream>, TransportError>;

    /// Accept the next inbound substream initiated by the remote side.
    async fn accept_stream(&self) -> Result<Box<dyn ByteStream>, TransportError>;

    async fn close(&self);
}

/// Accepts inbound connections for a listening transport.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;
}

/// A concrete transport, able to dial out or listen for inbound peers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError>;
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError>;
}
