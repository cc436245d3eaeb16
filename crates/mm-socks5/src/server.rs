//! `mm_socks5::Socks5Listener` — the C9 accept loop: handshake, parse
//! request, ask C3 (via [`RoutingContext::resolve_path`]) for a hop path,
//! hand it to C7's [`StreamManager::open`], then splice bytes until either
//! side closes (§4.9).

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use mm_peer::RoutingContext;

use crate::error::{reply_code_for, ReplyCode, Socks5Error};
use crate::handshake::{negotiate, Auth};
use crate::request::{encode_reply, read_request, unroutable_reply_addr, write_reply, Command};
use crate::sink::{spawn_reader, ClientSink};

pub struct Socks5Listener {
    routing: RoutingContext,
    auth: Option<Auth>,
}

impl Socks5Listener {
    pub fn new(routing: RoutingContext, auth: Option<Auth>) -> Self {
        Socks5Listener { routing, auth }
    }

    /// Binds `address` and serves connections until the process shuts down.
    /// Each accepted connection gets its own task so one slow/malicious
    /// client can't stall the listener (mirrors `mm-peer`'s one-task-per-peer
    /// shape).
    pub async fn serve(self: Arc<Self>, address: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(address).await?;
        info!(%address, "socks5 listener started");
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream).await {
                    debug!(%peer_addr, error = %e, "socks5 connection ended");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), Socks5Error> {
        negotiate(&mut stream, self.auth.as_ref()).await?;
        let request = read_request(&mut stream).await?;

        match request.command {
            Command::Connect => self.handle_connect(stream, request.addr, request.port).await,
            Command::Bind => {
                write_reply(&mut stream, ReplyCode::CommandNotSupported, unroutable_reply_addr(), 0).await?;
                Err(Socks5Error::BindUnsupported)
            }
            Command::UdpAssociate => {
                write_reply(&mut stream, ReplyCode::CommandNotSupported, unroutable_reply_addr(), 0).await?;
                Err(Socks5Error::UdpAssociateUnsupported)
            }
        }
    }

    async fn handle_connect(
        &self,
        mut stream: TcpStream,
        addr: mm_protocol::payload::Address,
        port: u16,
    ) -> Result<(), Socks5Error> {
        let Some(path) = self.routing.resolve_path(&addr) else {
            write_reply(&mut stream, ReplyCode::HostUnreachable, unroutable_reply_addr(), 0).await?;
            return Ok(());
        };

        let (read_half, write_half) = stream.into_split();
        let sink = Arc::new(ClientSink::new(write_half));

        match self.routing.streams.open(path, addr, port, sink.clone()).await {
            Ok((handle, bound_addr, bound_port)) => {
                sink.write_raw(encode_reply(ReplyCode::Succeeded, &bound_addr, bound_port));
                spawn_reader(read_half, handle);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "stream open failed");
                sink.write_raw(encode_reply(reply_code_for(e), &unroutable_reply_addr(), 0));
                Ok(())
            }
        }
    }
}
