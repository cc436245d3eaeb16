//! Builds one [`Transport`] per distinct [`TransportKind`] a config needs,
//! shared between whatever listener and outbound peers use that kind
//! (§4.5, §6): a kind with a configured listener binds there; a kind used
//! only to dial out binds an ephemeral local port.

use std::net::SocketAddr;
use std::sync::Arc;

use mm_config::{Config, TransportKind};
use mm_transport::{h2_transport::H2Transport, quic::QuicTransport, ws::WsTransport, Transport};

use crate::error::AgentError;

const EPHEMERAL: &str = "0.0.0.0:0";

fn bind(kind: TransportKind, local_addr: SocketAddr) -> Result<Arc<dyn Transport>, AgentError> {
    Ok(match kind {
        TransportKind::Quic => Arc::new(QuicTransport::bind(local_addr)?),
        TransportKind::H2 => Arc::new(H2Transport::new(local_addr)?),
        TransportKind::Ws => Arc::new(WsTransport::new(local_addr)?),
    })
}

/// One bound transport per [`TransportKind`] referenced by `config.listeners`
/// or `config.peers`. Listener addresses take priority as the bind address;
/// a kind with no listener binds ephemerally, since peers of that kind only
/// ever dial out.
pub fn build(config: &Config) -> Result<Vec<(TransportKind, Arc<dyn Transport>)>, AgentError> {
    let mut built: Vec<(TransportKind, Arc<dyn Transport>)> = Vec::new();

    for listener in &config.listeners {
        if built.iter().any(|(kind, _)| *kind == listener.transport) {
            continue;
        }
        let local_addr: SocketAddr = listener
            .address
            .parse()
            .map_err(|e| AgentError::io(format!("listener address '{}'", listener.address), std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}"))))?;
        built.push((listener.transport, bind(listener.transport, local_addr)?));
    }

    for peer in &config.peers {
        if built.iter().any(|(kind, _)| *kind == peer.transport) {
            continue;
        }
        let local_addr: SocketAddr = EPHEMERAL.parse().expect("constant parses");
        built.push((peer.transport, bind(peer.transport, local_addr)?));
    }

    Ok(built)
}

pub fn find(transports: &[(TransportKind, Arc<dyn Transport>)], kind: TransportKind) -> Arc<dyn Transport> {
    transports
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, t)| t.clone())
        .expect("build() registers a transport for every kind referenced by the config")
}
