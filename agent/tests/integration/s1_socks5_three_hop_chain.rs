//! Three agents — ingress, transit, exit — linked over in-memory
//! connections. The exit floods a CIDR route covering the test's local echo
//! server; that single advertisement propagates through the transit agent to
//! the ingress agent automatically via `handle_route_advertise`'s reflood.
//! A real SOCKS5 client then drives a CONNECT through the ingress agent's
//! real-socket listener and exchanges bytes end-to-end through the
//! encrypted relay.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use mm_exit::{ExitAllowlist, TcpExitHandler};
use mm_peer::connection::{self, ConnectionState, PeerConnectionConfig};
use mm_peer::{PeerRegistry, RoutingContext};
use mm_protocol::payload::{AddressFamily, RouteAdvertise, RouteEntryWire};
use mm_protocol::{AgentId, Frame, FrameType};
use mm_routing::flood::FloodState;
use mm_routing::{AgentPresenceTable, CidrTable, DomainTable, ForwardKeyTable};
use mm_stream::StreamManager;
use mm_test_support::{MemoryNetwork, MemoryTransport};
use mm_transport::Transport;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_V4: u8 = 0x01;
const REPLY_SUCCEEDED: u8 = 0x00;

fn agent_id() -> AgentId {
    AgentId::generate(&mut rand::rngs::OsRng)
}

fn bare_context(self_id: AgentId) -> RoutingContext {
    RoutingContext {
        cidr: Arc::new(CidrTable::new()),
        domains: Arc::new(DomainTable::new()),
        presence: Arc::new(AgentPresenceTable::new()),
        forward_keys: Arc::new(ForwardKeyTable::new()),
        flood_state: Arc::new(FloodState::new()),
        management_key: None,
        route_ttl: Duration::from_secs(300),
        registry: Arc::new(PeerRegistry::new()),
        streams: StreamManager::new(self_id),
    }
}

async fn wait_connected(mut rx: watch::Receiver<ConnectionState>) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("connection never reached Connected")
        .unwrap();
}

async fn wait_for_route(table: &CidrTable, addr: IpAddr) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if table.lookup(addr).is_some() {
            return;
        }
        if Instant::now() >= deadline {
            panic!("route for {addr} never propagated");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn socks5_connect_relays_through_three_hops() {
    let self_a = agent_id();
    let self_b = agent_id();
    let self_c = agent_id();

    let ctx_a = bare_context(self_a);
    let ctx_b = bare_context(self_b);
    let ctx_c = bare_context(self_c);
    ctx_c
        .streams
        .set_exit_handler(Arc::new(TcpExitHandler::new(ExitAllowlist::new(Vec::new()), Vec::new(), Duration::from_secs(5))));

    let network = MemoryNetwork::new();
    let transport_a: Arc<dyn Transport> = Arc::new(MemoryTransport::new(network.clone()));
    let transport_b: Arc<dyn Transport> = Arc::new(MemoryTransport::new(network.clone()));
    let transport_c: Arc<dyn Transport> = Arc::new(MemoryTransport::new(network.clone()));

    // B listens for both A and C.
    let listener_b_for_a = transport_b.listen("agent-b").await.unwrap();
    let ctx_b_for_a = ctx_b.clone();
    let accept_b_for_a = tokio::spawn(async move {
        let inbound = listener_b_for_a.accept().await.unwrap();
        connection::accept(inbound, PeerConnectionConfig::new(self_b), ctx_b_for_a)
    });
    let dial_a = connection::dial("agent-b".to_owned(), transport_a.clone(), PeerConnectionConfig::new(self_a), ctx_a.clone());
    let accepted_b_for_a = accept_b_for_a.await.unwrap();
    wait_connected(dial_a.subscribe()).await;
    wait_connected(accepted_b_for_a.subscribe()).await;

    let listener_b_for_c = transport_b.listen("agent-b-c").await.unwrap();
    let ctx_b_for_c = ctx_b.clone();
    let accept_b_for_c = tokio::spawn(async move {
        let inbound = listener_b_for_c.accept().await.unwrap();
        connection::accept(inbound, PeerConnectionConfig::new(self_b), ctx_b_for_c)
    });
    let dial_c = connection::dial(
        "agent-b-c".to_owned(),
        transport_c.clone(),
        PeerConnectionConfig::new(self_c),
        ctx_c.clone(),
    );
    let accepted_b_for_c = accept_b_for_c.await.unwrap();
    wait_connected(dial_c.subscribe()).await;
    wait_connected(accepted_b_for_c.subscribe()).await;

    let echo_port = run_echo_server().await;

    // C floods a route covering 127.0.0.0/8 — that's where the echo server
    // lives. B reflloods it onward to A without any test-level help.
    let advertisement = RouteAdvertise {
        origin: self_c,
        sequence: 1,
        routes: vec![RouteEntryWire {
            family: AddressFamily::V4,
            prefix: Ipv4Addr::new(127, 0, 0, 0).octets().to_vec(),
            prefix_len: 8,
            metric: 0,
        }],
        path: Vec::new(),
        seen_by: Vec::new(),
    };
    ctx_c
        .registry
        .send_control(self_b, Frame::control(FrameType::RouteAdvertise, advertisement.encode()))
        .await;

    wait_for_route(&ctx_a.cidr, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))).await;

    let socks5 = Arc::new(mm_socks5::Socks5Listener::new(ctx_a.clone(), None));
    let socks5_addr = "127.0.0.1:11081";
    {
        let socks5 = socks5.clone();
        tokio::spawn(async move {
            let _ = socks5.serve(socks5_addr).await;
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(socks5_addr).await.unwrap();
    client.write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH]).await.unwrap();
    let mut method_reply = [0u8; 2];
    client.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [SOCKS_VERSION, METHOD_NO_AUTH]);

    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_V4];
    request.extend_from_slice(&Ipv4Addr::new(127, 0, 0, 1).octets());
    request.extend_from_slice(&echo_port.to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply_head = [0u8; 4];
    client.read_exact(&mut reply_head).await.unwrap();
    assert_eq!(reply_head[0], SOCKS_VERSION);
    assert_eq!(reply_head[1], REPLY_SUCCEEDED);
    let mut bound_addr = [0u8; 4];
    client.read_exact(&mut bound_addr).await.unwrap();
    let mut bound_port = [0u8; 2];
    client.read_exact(&mut bound_port).await.unwrap();

    client.write_all(b"hello through three hops").await.unwrap();
    let mut echoed = [0u8; 25];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello through three hops");

    dial_a.shutdown();
    accepted_b_for_a.shutdown();
    dial_c.shutdown();
    accepted_b_for_c.shutdown();
}
