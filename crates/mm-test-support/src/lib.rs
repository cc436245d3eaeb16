//! In-memory `Transport` implementation for integration tests.
//!
//! Grounded on `rt-test-utils`' `MockWsServer`/`MockWsClient` pattern: real
//! production code drives the public `Transport` trait, a mock backend
//! swaps out the actual network so tests run deterministically without
//! binding sockets. Here a [`MemoryNetwork`] plays the role of the
//! in-process broker `MockWsServer` plays for `rt-test-utils` — `dial`
//! and `listen` exchange a `tokio::io::duplex` pair instead of a TCP
//! connection, and the single-stream-per-connection semantics mirror
//! `mm-transport`'s h2/WebSocket adapters (`WsConnection`) rather than
//! QUIC's native multiplexing, since that is the harder case to get right.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use mm_transport::{ByteStream, Connection, Listener, Transport, TransportError};

/// Byte capacity of the `tokio::io::duplex` pipe backing each connection.
const DUPLEX_BUF: usize = 64 * 1024;

type InboundSender = mpsc::UnboundedSender<Box<dyn Connection>>;

/// A shared in-process network: `listen` registers an address, `dial`
/// connects to one already registered. Clone and hand the same instance to
/// every [`MemoryTransport`] that should be able to reach each other in a
/// test; transports built from separate networks can never see one
/// another, same as binding to disjoint address families in production.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    listeners: Arc<SyncMutex<HashMap<String, InboundSender>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork::default()
    }

    fn register(&self, addr: &str) -> mpsc::UnboundedReceiver<Box<dyn Connection>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(addr.to_owned(), tx);
        rx
    }

    fn unregister(&self, addr: &str) {
        self.listeners.lock().remove(addr);
    }

    fn sender_for(&self, addr: &str) -> Option<InboundSender> {
        self.listeners.lock().get(addr).cloned()
    }
}

/// A [`Transport`] backed by a [`MemoryNetwork`] rather than real sockets.
/// `dial`/`listen` addresses are opaque strings — tests typically use
/// human-readable names (`"agent-a"`) rather than socket addresses.
pub struct MemoryTransport {
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn new(network: MemoryNetwork) -> Self {
        MemoryTransport { network }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        let sender = self
            .network
            .sender_for(addr)
            .ok_or_else(|| TransportError::Dial(format!("no listener registered for '{addr}'")))?;

        let (local, remote) = tokio::io::duplex(DUPLEX_BUF);
        let remote_conn: Box<dyn Connection> = Box::new(MemoryConnection::new(Box::new(remote)));
        sender
            .send(remote_conn)
            .map_err(|_| TransportError::Dial(format!("listener for '{addr}' is gone")))?;

        Ok(Box::new(MemoryConnection::new(Box::new(local))))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError> {
        let rx = self.network.register(addr);
        Ok(Box::new(MemoryListener {
            network: self.network.clone(),
            addr: addr.to_owned(),
            receiver: AsyncMutex::new(rx),
        }))
    }
}

pub struct MemoryListener {
    network: MemoryNetwork,
    addr: String,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Box<dyn Connection>>>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.unregister(&self.addr);
    }
}

/// A single-stream connection, same contract as `mm-transport`'s h2/WS
/// adapters: whichever of `open_stream`/`accept_stream` is called first
/// gets the one duplex pipe, later calls see `StreamLimitReached`.
pub struct MemoryConnection {
    stream: SyncMutex<Option<Box<dyn ByteStream>>>,
}

impl MemoryConnection {
    fn new(stream: Box<dyn ByteStream>) -> Self {
        MemoryConnection {
            stream: SyncMutex::new(Some(stream)),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn multiplexed(&self) -> bool {
        false
    }

    async fn open_stream(&self) -> Result<Box<dyn ByteStream>, TransportError> {
        self.stream.lock().take().ok_or(TransportError::StreamLimitReached)
    }

    async fn accept_stream(&self) -> Result<Box<dyn ByteStream>, TransportError> {
        self.stream.lock().take().ok_or(TransportError::StreamLimitReached)
    }

    async fn close(&self) {
        self.stream.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn dial_without_listener_fails() {
        let net = MemoryNetwork::new();
        let transport = MemoryTransport::new(net);
        let err = transport.dial("nowhere").await.unwrap_err();
        assert!(matches!(err, TransportError::Dial(_)));
    }

    #[tokio::test]
    async fn dial_and_accept_exchange_bytes() {
        let net = MemoryNetwork::new();
        let server = MemoryTransport::new(net.clone());
        let client = MemoryTransport::new(net);

        let listener = server.listen("agent-a").await.unwrap();
        let accept_task = tokio::spawn(async move { listener.accept().await.unwrap() });

        let client_conn = client.dial("agent-a").await.unwrap();
        let server_conn = accept_task.await.unwrap();

        let mut client_stream = client_conn.open_stream().await.unwrap();
        let mut server_stream = server_conn.accept_stream().await.unwrap();

        client_stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server_stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn second_open_stream_call_hits_the_limit() {
        let net = MemoryNetwork::new();
        let transport = MemoryTransport::new(net.clone());
        let listener = transport.listen("agent-b").await.unwrap();
        tokio::spawn(async move { listener.accept().await });
        let conn = transport.dial("agent-b").await.unwrap();
        conn.open_stream().await.unwrap();
        let err = conn.open_stream().await.unwrap_err();
        assert!(matches!(err, TransportError::StreamLimitReached));
    }
}
