//! Two agents connected over an in-memory transport: a fresher sequence
//! number from the same origin replaces an installed route's metric, a
//! stale or duplicate sequence is dropped, exactly as `mm_routing::flood`'s
//! crate-internal tests already show at the `FloodEngine` level — this
//! exercises the same rule through a real peer connection's dispatch loop.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use mm_peer::connection::{self, ConnectionState, PeerConnectionConfig};
use mm_peer::{PeerRegistry, RoutingContext};
use mm_protocol::payload::{AddressFamily, RouteAdvertise, RouteEntryWire};
use mm_protocol::{AgentId, Frame, FrameType};
use mm_routing::flood::FloodState;
use mm_routing::{AgentPresenceTable, CidrTable, DomainTable, ForwardKeyTable};
use mm_stream::StreamManager;
use mm_test_support::{MemoryNetwork, MemoryTransport};
use mm_transport::Transport;

fn agent_id() -> AgentId {
    AgentId::generate(&mut rand::rngs::OsRng)
}

fn fresh_context(self_id: AgentId) -> RoutingContext {
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

async fn wait_for_metric(table: &CidrTable, addr: IpAddr, expected: u16) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(entry) = table.lookup(addr) {
            if entry.metric == expected {
                return;
            }
        }
        if Instant::now() >= deadline {
            panic!("route metric for {addr} never reached {expected}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn advertise(origin: AgentId, sequence: u64, metric: u16) -> RouteAdvertise {
    RouteAdvertise {
        origin,
        sequence,
        routes: vec![RouteEntryWire {
            family: AddressFamily::V4,
            prefix: Ipv4Addr::new(10, 0, 0, 0).octets().to_vec(),
            prefix_len: 8,
            metric,
        }],
        path: Vec::new(),
        seen_by: Vec::new(),
    }
}

#[tokio::test]
async fn fresher_sequence_replaces_entry_and_stale_is_dropped() {
    let self_a = agent_id();
    let self_b = agent_id();

    let ctx_a = fresh_context(self_a);
    let ctx_b = fresh_context(self_b);

    let network = MemoryNetwork::new();
    let transport_a: Arc<dyn Transport> = Arc::new(MemoryTransport::new(network.clone()));
    let transport_b: Arc<dyn Transport> = Arc::new(MemoryTransport::new(network.clone()));

    let listener_b = transport_b.listen("agent-b").await.unwrap();
    let ctx_b_accept = ctx_b.clone();
    let accept_task = tokio::spawn(async move {
        let inbound = listener_b.accept().await.unwrap();
        connection::accept(inbound, PeerConnectionConfig::new(self_b), ctx_b_accept)
    });

    let dialer = connection::dial(
        "agent-b".to_owned(),
        transport_a.clone(),
        PeerConnectionConfig::new(self_a),
        ctx_a.clone(),
    );
    let accepted = accept_task.await.unwrap();

    wait_connected(dialer.subscribe()).await;
    wait_connected(accepted.subscribe()).await;

    // `self_a` advertises a route to `self_b`; `self_b`'s table installs it
    // with `next_hop = self_a` and `metric = advertised_metric + 1`.
    ctx_a
        .registry
        .send_control(self_b, Frame::control(FrameType::RouteAdvertise, advertise(self_a, 1, 0).encode()))
        .await;
    wait_for_metric(&ctx_b.cidr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1).await;

    // A duplicate of the same sequence number must be dropped outright.
    ctx_a
        .registry
        .send_control(self_b, Frame::control(FrameType::RouteAdvertise, advertise(self_a, 1, 9).encode()))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        ctx_b.cidr.lookup(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap().metric,
        1,
        "stale sequence must not replace the installed entry"
    );

    // A fresher sequence number supersedes it.
    ctx_a
        .registry
        .send_control(self_b, Frame::control(FrameType::RouteAdvertise, advertise(self_a, 2, 3).encode()))
        .await;
    wait_for_metric(&ctx_b.cidr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 4).await;

    dialer.shutdown();
    accepted.shutdown();
}
