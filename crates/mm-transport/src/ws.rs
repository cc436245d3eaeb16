//! WebSocket transport adapter: binary frames carried over `tokio-tungstenite`,
//! TLS via `tokio-rustls`. Like h2, a WebSocket connection carries exactly one
//! logical byte stream — virtual-stream multiplexing happens one layer up, in
//! `mm-stream`'s frame-level fairness scheduler (C8).
//!
//! `tokio-tungstenite` exposes a message-oriented `Sink`/`Stream`, not
//! `AsyncRead`/`AsyncWrite`. [`WsByteStream`] bridges the two: a background
//! task owns the `WebSocketStream` and shuffles bytes to/from an in-process
//! `tokio::io::duplex` pipe, whose near end is handed back as an ordinary
//! `ByteStream`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::tls::ephemeral_configs;
use crate::{ByteStream, Connection, Listener, Transport, TransportError};

/// Bridge buffer size between the duplex pipe and the WebSocket connection.
const BRIDGE_BUF: usize = 64 * 1024;

/// Spawn the bridging task and return the local half of the duplex pipe as
/// a plain `ByteStream`.
fn bridge<S>(mut ws: WebSocketStream<S>) -> Box<dyn ByteStream>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (local, mut remote) = tokio::io::duplex(BRIDGE_BUF);

    tokio::spawn(async move {
        let mut read_buf = vec![0u8; BRIDGE_BUF];
        loop {
            tokio::select! {
                biased;

                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            if remote.write_all(&data).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {
                            // Text/Ping/Pong/Frame — not part of the byte
                            // stream contract; tungstenite answers pings
                            // internally, so there's nothing to forward.
                        }
                        Some(Err(e)) => {
                            debug!(error = %e, "websocket read error, closing bridge");
                            break;
                        }
                    }
                }

                n = remote.read(&mut read_buf) => {
                    match n {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if ws.send(Message::Binary(read_buf[..n].to_vec())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        let _ = ws.close(None).await;
    });

    Box::new(local)
}

/// WebSocket transport bound to one local TCP address for listening; dials
/// are stateless (a fresh TCP + TLS handshake per call). TLS defaults to an
/// ephemeral self-signed certificate with peer verification disabled, per
/// §4.5 — `strict` deployments instead provide a real certificate/CA through
/// `mm-config` and construct `WsTransport` with that config directly.
pub struct WsTransport {
    local_addr: SocketAddr,
    server_config: Arc<rustls::ServerConfig>,
    client_config: Arc<rustls::ClientConfig>,
}

impl WsTransport {
    pub fn new(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let (server_config, client_config) = ephemeral_configs()?;
        Ok(WsTransport {
            local_addr,
            server_config,
            client_config,
        })
    }

    pub fn with_configs(
        local_addr: SocketAddr,
        server_config: Arc<rustls::ServerConfig>,
        client_config: Arc<rustls::ClientConfig>,
    ) -> Self {
        WsTransport {
            local_addr,
            server_config,
            client_config,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        let socket_addr: SocketAddr = addr
            .trim_start_matches("wss://")
            .trim_start_matches("ws://")
            .parse()
            .map_err(|e| TransportError::Dial(format!("invalid address '{addr}': {e}")))?;
        let tcp = TcpStream::connect(socket_addr)
            .await
            .map_err(TransportError::Io)?;
        tcp.set_nodelay(true).ok();

        let connector = TlsConnector::from(self.client_config.clone());
        let server_name = rustls::pki_types::ServerName::try_from("muti-metroo")
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .to_owned();
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let (ws, _response) = tokio_tungstenite::client_async(format!("wss://{addr}/muti-metroo"), tls)
            .await
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        debug!(%addr, "websocket (wss) connection established");
        Ok(Box::new(WsConnection::new(bridge(ws))))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError> {
        let bind_addr: SocketAddr = if addr.is_empty() {
            self.local_addr
        } else {
            addr.parse()
                .map_err(|e| TransportError::Listen(format!("invalid address '{addr}': {e}")))?
        };
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(TransportError::Io)?;
        Ok(Box::new(WsListener {
            listener,
            acceptor: TlsAcceptor::from(self.server_config.clone()),
        }))
    }
}

pub struct WsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

#[async_trait]
impl Listener for WsListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Io)?;
        tcp.set_nodelay(true).ok();
        let tls = self
            .acceptor
            .accept(tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let ws = tokio_tungstenite::accept_async(tls)
            .await
            .map_err(|e| TransportError::Listen(e.to_string()))?;
        debug!(%peer, "accepted websocket (wss) connection");
        Ok(Box::new(WsConnection::new(bridge(ws))))
    }
}

/// A single-stream connection: the one bridged byte stream is handed out by
/// whichever of `open_stream`/`accept_stream` is called first.
pub struct WsConnection {
    stream: Arc<Mutex<Option<Box<dyn ByteStream>>>>,
}

impl WsConnection {
    fn new(stream: Box<dyn ByteStream>) -> Self {
        WsConnection {
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn multiplexed(&self) -> bool {
        false
    }

    async fn open_stream(&self) -> Result<Box<dyn ByteStream>, TransportError> {
        self.stream
            .lock()
            .await
            .take()
            .ok_or(TransportError::StreamLimitReached)
    }

    async fn accept_stream(&self) -> Result<Box<dyn ByteStream>, TransportError> {
        self.stream
            .lock()
            .await
            .take()
            .ok_or(TransportError::StreamLimitReached)
    }

    async fn close(&self) {
        self.stream.lock().await.take();
    }
}
