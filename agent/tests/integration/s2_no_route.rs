//! A SOCKS5 ingress with no peers and no installed routes must answer every
//! CONNECT with `HostUnreachable` rather than hanging or panicking — the
//! `resolve_path` miss inside `Socks5Listener::handle_connect` short-circuits
//! before a stream is ever opened.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mm_peer::{PeerRegistry, RoutingContext};
use mm_protocol::AgentId;
use mm_routing::flood::FloodState;
use mm_routing::{AgentPresenceTable, CidrTable, DomainTable, ForwardKeyTable};
use mm_socks5::Socks5Listener;
use mm_stream::StreamManager;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;

#[tokio::test]
async fn connect_with_no_route_gets_host_unreachable() {
    let self_id = AgentId::generate(&mut rand::rngs::OsRng);
    let ctx = RoutingContext {
        cidr: Arc::new(CidrTable::new()),
        domains: Arc::new(DomainTable::new()),
        presence: Arc::new(AgentPresenceTable::new()),
        forward_keys: Arc::new(ForwardKeyTable::new()),
        flood_state: Arc::new(FloodState::new()),
        management_key: None,
        route_ttl: Duration::from_secs(300),
        registry: Arc::new(PeerRegistry::new()),
        streams: StreamManager::new(self_id),
    };

    let listener = Arc::new(Socks5Listener::new(ctx, None));
    let address = "127.0.0.1:11080";
    {
        let listener = listener.clone();
        tokio::spawn(async move {
            let _ = listener.serve(address).await;
        });
    }
    // give the bind a moment to land before dialing it
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(address).await.unwrap();

    client.write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH]).await.unwrap();
    let mut method_reply = [0u8; 2];
    client.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [SOCKS_VERSION, METHOD_NO_AUTH]);

    let domain = b"example.invalid";
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, domain.len() as u8];
    request.extend_from_slice(domain);
    request.extend_from_slice(&443u16.to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply_head = [0u8; 4];
    client.read_exact(&mut reply_head).await.unwrap();
    assert_eq!(reply_head[0], SOCKS_VERSION);
    assert_eq!(reply_head[1], REPLY_HOST_UNREACHABLE);
}
