//! HTTP/2 transport adapter: a single long-lived bidirectional streaming
//! request/response body carries the connection, using the `h2` crate
//! directly (not a full HTTP server/client stack — just its frame
//! multiplexing and flow control). Like WebSocket, one h2 connection
//! carries exactly one logical byte stream; `mm-stream`'s fairness
//! scheduler (C8) multiplexes virtual streams on top.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use h2::{RecvStream, SendStream};
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::tls::ephemeral_configs;
use crate::{ByteStream, Connection, Listener, Transport, TransportError};

const BRIDGE_BUF: usize = 64 * 1024;
const TUNNEL_PATH: &str = "/muti-metroo/tunnel";

/// Bridge an h2 send/recv stream pair to a `tokio::io::duplex` pipe, same
/// shape as the WebSocket adapter's bridge.
fn bridge(mut send: SendStream<Bytes>, mut recv: RecvStream) -> Box<dyn ByteStream> {
    let (local, mut remote) = tokio::io::duplex(BRIDGE_BUF);

    tokio::spawn(async move {
        let mut read_buf = vec![0u8; BRIDGE_BUF];
        loop {
            tokio::select! {
                biased;

                chunk = recv.data() => {
                    match chunk {
                        Some(Ok(data)) => {
                            let len = data.len();
                            let _ = recv.flow_control().release_capacity(len);
                            if remote.write_all(&data).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }

                n = remote.read(&mut read_buf) => {
                    match n {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if send.send_data(Bytes::copy_from_slice(&read_buf[..n]), false).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        let _ = send.send_data(Bytes::new(), true);
    });

    Box::new(local)
}

/// HTTP/2 transport bound to one local TCP address for listening.
pub struct H2Transport {
    local_addr: SocketAddr,
    server_config: Arc<rustls::ServerConfig>,
    client_config: Arc<rustls::ClientConfig>,
}

impl H2Transport {
    pub fn new(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let (server_config, client_config) = ephemeral_configs()?;
        Ok(H2Transport {
            local_addr,
            server_config,
            client_config,
        })
    }
}

#[async_trait]
impl Transport for H2Transport {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        let socket_addr: SocketAddr = addr
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

        let (mut client, h2_conn) = h2::client::handshake(tls)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = h2_conn.await {
                debug!(error = %e, "h2 client connection driver exited");
            }
        });

        let request = Request::post(TUNNEL_PATH)
            .body(())
            .expect("static POST request is always well-formed");
        let (response_fut, send_stream) = client
            .send_request(request, false)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let response = response_fut
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(TransportError::Protocol(format!(
                "unexpected tunnel response status {}",
                response.status()
            )));
        }
        let recv_stream = response.into_body();

        debug!(%addr, "h2 tunnel established");
        Ok(Box::new(H2Connection::new(bridge(send_stream, recv_stream))))
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
        Ok(Box::new(H2Listener {
            listener,
            acceptor: TlsAcceptor::from(self.server_config.clone()),
        }))
    }
}

pub struct H2Listener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

#[async_trait]
impl Listener for H2Listener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Io)?;
        tcp.set_nodelay(true).ok();
        let tls = self
            .acceptor
            .accept(tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let mut h2_conn = h2::server::handshake(tls)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let (request, mut respond) = h2_conn
            .accept()
            .await
            .ok_or(TransportError::ConnectionClosed)?
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let recv_stream = request.into_body();

        let response = Response::builder()
            .status(StatusCode::OK)
            .body(())
            .expect("static 200 response is always well-formed");
        let send_stream = respond
            .send_response(response, false)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        tokio::spawn(async move {
            // Drain the remaining request stream of any further requests on
            // this connection; the tunnel contract is a single request, but
            // we keep the connection alive so h2's own ping/goaway plumbing
            // keeps working until the peer closes it.
            while let Some(next) = h2_conn.accept().await {
                if next.is_err() {
                    break;
                }
            }
        });

        debug!(%peer, "accepted h2 tunnel");
        Ok(Box::new(H2Connection::new(bridge(send_stream, recv_stream))))
    }
}

/// A single-stream connection, same take-once shape as the WebSocket
/// adapter: `open_stream`/`accept_stream` both hand out the one bridged
/// stream and error on subsequent calls.
pub struct H2Connection {
    stream: Arc<Mutex<Option<Box<dyn ByteStream>>>>,
}

impl H2Connection {
    fn new(stream: Box<dyn ByteStream>) -> Self {
        H2Connection {
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }
}

#[async_trait]
impl Connection for H2Connection {
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
