//! The peer connection state machine (§4.6): dial/accept, handshake, the
//! reader dispatch loop, keepalive, reconnect backoff, and disconnect
//! cleanup.
//!
//! `Disconnected -> Connecting -> Handshaking -> Connected <-> Reconnecting`.
//! Dialed peers loop through this forever (bounded only by the configured
//! backoff's `max_retries`); accepted peers run the established phase once
//! and end when the remote goes away, since a redial shows up as a brand
//! new inbound connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mm_protocol::payload::{Keepalive, NodeInfoAdvertise, RouteAdvertise};
use mm_protocol::{AgentId, Frame, FrameType, Payload};
use mm_routing::flood::{Advertisement, FloodEngine};
use mm_transport::{Connection, Transport};
use tokio::sync::{mpsc, watch, Notify};

use crate::backoff::{Backoff, BackoffConfig};
use crate::handshake::{self, HandshakeOutcome};
use crate::routing_context::RoutingContext;
use crate::wire;
use crate::writer::{self, PeerWriterHandle};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A cooperative shutdown signal, checked at every suspension point in the
/// dial loop, the established-connection loop, and the keepalive task.
#[derive(Clone)]
struct Shutdown {
    notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl Shutdown {
    fn new() -> Self {
        Shutdown {
            notify: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Reconnecting,
}

#[derive(Clone)]
pub struct PeerConnectionConfig {
    pub local_agent: AgentId,
    pub capabilities: Vec<String>,
    pub expected_agent_id: Option<AgentId>,
    pub idle_threshold: Duration,
    pub keepalive_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl PeerConnectionConfig {
    pub fn new(local_agent: AgentId) -> Self {
        PeerConnectionConfig {
            local_agent,
            capabilities: Vec::new(),
            expected_agent_id: None,
            idle_threshold: Duration::from_secs(5 * 60),
            keepalive_timeout: Duration::from_secs(90),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Handle to one running peer connection task. Dropping it does not stop
/// the task; call [`PeerConnection::shutdown`] explicitly.
pub struct PeerConnection {
    state_rx: watch::Receiver<ConnectionState>,
    shutdown: Shutdown,
}

impl PeerConnection {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Request the connection (and, for dialed peers, its reconnect loop)
    /// to stop. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Dial `addr` and keep the connection alive, reconnecting with backoff
/// (§4.6) until `shutdown` is called or `config.backoff.max_retries` is
/// exhausted.
pub fn dial(
    addr: String,
    transport: Arc<dyn Transport>,
    config: PeerConnectionConfig,
    ctx: RoutingContext,
) -> PeerConnection {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let shutdown = Shutdown::new();
    let task_shutdown = shutdown.clone();

    tokio::spawn(async move {
        let mut backoff = Backoff::new(config.backoff);

        loop {
            if task_shutdown.is_cancelled() {
                let _ = state_tx.send(ConnectionState::Disconnected);
                return;
            }

            let _ = state_tx.send(ConnectionState::Connecting);
            let dial_result = tokio::select! {
                result = transport.dial(&addr) => result,
                _ = task_shutdown.cancelled() => return,
            };

            let connection: Arc<dyn Connection> = match dial_result {
                Ok(connection) => Arc::from(connection),
                Err(error) => {
                    tracing::warn!(%addr, %error, "dial failed");
                    let _ = state_tx.send(ConnectionState::Reconnecting);
                    if !sleep_backoff(&mut backoff, &task_shutdown).await {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        return;
                    }
                    continue;
                }
            };

            let _ = state_tx.send(ConnectionState::Handshaking);
            let outcome = handshake::dial_handshake(
                connection.as_ref(),
                config.local_agent,
                config.capabilities.clone(),
                config.expected_agent_id,
            )
            .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(%addr, %error, "handshake failed");
                    connection.close().await;
                    let _ = state_tx.send(ConnectionState::Reconnecting);
                    if !sleep_backoff(&mut backoff, &task_shutdown).await {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        return;
                    }
                    continue;
                }
            };

            backoff.reset();
            let _ = state_tx.send(ConnectionState::Connected);
            tracing::info!(%addr, peer = %outcome.peer_id, "peer connection established");

            run_established(connection.clone(), outcome, true, &config, &ctx, &task_shutdown).await;
            connection.close().await;

            if task_shutdown.is_cancelled() {
                let _ = state_tx.send(ConnectionState::Disconnected);
                return;
            }
            let _ = state_tx.send(ConnectionState::Reconnecting);
            if !sleep_backoff(&mut backoff, &task_shutdown).await {
                let _ = state_tx.send(ConnectionState::Disconnected);
                return;
            }
        }
    });

    PeerConnection { state_rx, shutdown }
}

/// Run the handshake and established phase over an already-accepted
/// connection. No reconnect loop: a redial from this peer arrives as a new
/// `Listener::accept` and gets its own `PeerConnection`.
pub fn accept(connection: Box<dyn Connection>, config: PeerConnectionConfig, ctx: RoutingContext) -> PeerConnection {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Handshaking);
    let shutdown = Shutdown::new();
    let task_shutdown = shutdown.clone();
    let connection: Arc<dyn Connection> = Arc::from(connection);

    tokio::spawn(async move {
        let outcome = handshake::accept_handshake(
            connection.as_ref(),
            config.local_agent,
            config.capabilities.clone(),
            config.expected_agent_id,
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%error, "inbound handshake failed");
                connection.close().await;
                let _ = state_tx.send(ConnectionState::Disconnected);
                return;
            }
        };

        let _ = state_tx.send(ConnectionState::Connected);
        tracing::info!(peer = %outcome.peer_id, "inbound peer connection established");

        run_established(connection.clone(), outcome, false, &config, &ctx, &task_shutdown).await;
        connection.close().await;
        let _ = state_tx.send(ConnectionState::Disconnected);
    });

    PeerConnection { state_rx, shutdown }
}

async fn sleep_backoff(backoff: &mut Backoff, shutdown: &Shutdown) -> bool {
    match backoff.next_delay() {
        Some(delay) => {
            tokio::select! {
                () = tokio::time::sleep(delay) => true,
                () = shutdown.cancelled() => false,
            }
        }
        None => false,
    }
}

/// Wire the writer, register with the routing context, and run the
/// reader-dispatch loop plus keepalive until the peer disconnects or
/// `shutdown` fires. Cleans up every shared table entry this peer
/// contributed before returning.
async fn run_established(
    connection: Arc<dyn Connection>,
    outcome: HandshakeOutcome,
    we_are_dialer: bool,
    config: &PeerConnectionConfig,
    ctx: &RoutingContext,
    shutdown: &Shutdown,
) {
    let peer_id = outcome.peer_id;
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<(AgentId, Frame)>();

    let writer_handle = if connection.multiplexed() {
        writer::spawn_multiplexed(connection.clone(), peer_id, outcome.control_stream, inbound_tx)
    } else {
        writer::spawn_single_stream(peer_id, outcome.control_stream, inbound_tx)
    };

    ctx.registry.insert(peer_id, writer_handle.clone());
    ctx.streams
        .register_peer(peer_id, writer_handle.clone(), we_are_dialer, connection.multiplexed());

    let activity = Arc::new(Notify::new());
    let (ack_tx, ack_rx) = mpsc::unbounded_channel::<u64>();

    let keepalive_task = tokio::spawn(run_keepalive(
        writer_handle.clone(),
        peer_id,
        config.idle_threshold,
        config.keepalive_timeout,
        activity.clone(),
        ack_rx,
        shutdown.clone(),
    ));
    tokio::pin!(keepalive_task);

    loop {
        tokio::select! {
            received = inbound_rx.recv() => {
                let Some((from_peer, frame)) = received else { break };
                activity.notify_one();
                if frame.header.frame_type == FrameType::KeepaliveAck {
                    if let Ok(ack) = Keepalive::decode(frame.payload.clone()) {
                        let _ = ack_tx.send(ack.timestamp);
                    }
                }
                dispatch_frame(ctx, from_peer, frame).await;
            }
            () = shutdown.cancelled() => break,
            _ = &mut keepalive_task => {
                tracing::warn!(peer = %peer_id, "keepalive timed out, disconnecting");
                break;
            }
        }
    }

    keepalive_task.abort();
    ctx.registry.remove(peer_id);
    ctx.streams.unregister_peer(peer_id).await;
    ctx.cidr.remove_via_next_hop(peer_id);
    ctx.domains.remove_via_next_hop(peer_id);
    ctx.presence.remove_via_next_hop(peer_id);
    ctx.forward_keys.remove_via_next_hop(peer_id);
    tracing::info!(peer = %peer_id, "peer connection torn down");
}

/// Emits `KEEPALIVE` after `idle_threshold` of inactivity and declares the
/// peer dead if no `KEEPALIVE_ACK` (or any other activity) arrives within
/// `keepalive_timeout` (§4.6). Returning ends the established-connection
/// loop via the `select!` in `run_established`.
async fn run_keepalive(
    handle: Arc<PeerWriterHandle>,
    peer_id: AgentId,
    idle_threshold: Duration,
    keepalive_timeout: Duration,
    activity: Arc<Notify>,
    mut ack_rx: mpsc::UnboundedReceiver<u64>,
    shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(idle_threshold) => {}
            () = activity.notified() => continue,
            () = shutdown.cancelled() => return,
        }

        let timestamp = now_millis();
        handle
            .send_control_frame(Frame::control(FrameType::Keepalive, Keepalive { timestamp }.encode()))
            .await;
        tracing::debug!(peer = %peer_id, "sent keepalive after idle threshold");

        let acked = tokio::select! {
            ack = ack_rx.recv() => ack.is_some(),
            () = activity.notified() => true,
            () = tokio::time::sleep(keepalive_timeout) => false,
            () = shutdown.cancelled() => return,
        };

        if !acked {
            return;
        }
    }
}

/// Route a decoded frame to the stream manager or the routing tables.
/// Unknown frame types and malformed payloads are logged and dropped (§9):
/// a peer running a newer protocol version never crashes an older one.
async fn dispatch_frame(ctx: &RoutingContext, peer_id: AgentId, frame: Frame) {
    let stream_id = frame.header.stream_id;
    let flags = frame.header.flags;

    let payload = match Payload::parse(&frame) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(peer = %peer_id, %error, "dropping frame with malformed payload");
            return;
        }
    };

    match payload {
        Payload::StreamOpen(open) => ctx.streams.on_stream_open(peer_id, stream_id, open).await,
        Payload::StreamOpenAck(ack) => ctx.streams.on_stream_open_ack(peer_id, stream_id, ack).await,
        Payload::StreamOpenErr(err) => ctx.streams.on_stream_open_err(peer_id, stream_id, err).await,
        Payload::StreamData(data) => ctx.streams.on_stream_data(peer_id, stream_id, data).await,
        Payload::StreamClose => ctx.streams.on_stream_close(peer_id, stream_id, flags).await,
        Payload::StreamReset(reset) => ctx.streams.on_stream_reset(peer_id, stream_id, reset).await,
        Payload::RouteAdvertise(wire) => handle_route_advertise(ctx, peer_id, wire, false).await,
        Payload::RouteWithdraw(wire) => handle_route_advertise(ctx, peer_id, wire, true).await,
        Payload::NodeInfoAdvertise(wire) => handle_node_info(ctx, peer_id, wire).await,
        Payload::PeerHello(_) | Payload::PeerHelloAck(_) => {
            tracing::debug!(peer = %peer_id, "ignoring peer_hello received outside the handshake window");
        }
        Payload::Keepalive(hello) => {
            let ack = Keepalive { timestamp: hello.timestamp };
            ctx.registry
                .send_control(peer_id, Frame::control(FrameType::KeepaliveAck, ack.encode()))
                .await;
        }
        Payload::KeepaliveAck(_) => {
            // Timestamp already forwarded to the keepalive task by the caller.
        }
        Payload::ControlRequest(_) | Payload::ControlResponse(_) => {
            tracing::debug!(peer = %peer_id, "control request/response handling is not implemented yet");
        }
        Payload::Unknown(code, _) => {
            tracing::debug!(peer = %peer_id, code, "dropping frame of unrecognized type");
        }
    }
}

/// Apply an incoming `ROUTE_ADVERTISE`/`ROUTE_WITHDRAW` to the CIDR table
/// and reflood to whichever peers the flood engine says haven't seen it.
async fn handle_route_advertise(ctx: &RoutingContext, from_peer: AgentId, wire: RouteAdvertise, is_withdraw: bool) {
    let engine = FloodEngine {
        self_id: ctx.streams.local_agent(),
        state: &ctx.flood_state,
        table: &ctx.cidr,
        ttl: ctx.route_ttl,
        known_peers: ctx.registry.known_peer_ids(),
    };

    let routes = wire.routes.iter().filter_map(crate::wire::wire_to_advertised_cidr).collect();
    let advertisement = Advertisement {
        origin: wire.origin,
        sequence: wire.sequence,
        routes,
        path: wire.path.clone(),
        seen_by: wire.seen_by.clone(),
    };

    let result = if is_withdraw {
        engine.on_withdraw(from_peer, advertisement)
    } else {
        engine.on_advertise(from_peer, advertisement)
    };

    if result.reflood_to.is_empty() {
        return;
    }

    let mut new_path = vec![from_peer];
    new_path.extend(wire.path.iter().copied());
    let mut new_seen_by = wire.seen_by.clone();
    new_seen_by.push(ctx.streams.local_agent());

    let out_routes = if is_withdraw {
        wire.routes.clone()
    } else {
        result.installed.iter().map(crate::wire::cidr_entry_to_wire).collect()
    };

    let out = RouteAdvertise {
        origin: wire.origin,
        sequence: wire.sequence,
        routes: out_routes,
        path: new_path,
        seen_by: new_seen_by,
    };
    let frame_type = if is_withdraw {
        FrameType::RouteWithdraw
    } else {
        FrameType::RouteAdvertise
    };
    let encoded = out.encode();
    for peer in result.reflood_to {
        ctx.registry.send_control(peer, Frame::control(frame_type, encoded.clone())).await;
    }
}

/// Apply an incoming `NODE_INFO_ADVERTISE`: run it through the same
/// freshness/loop check CIDR advertisements use, optionally decrypt the
/// opaque body under the configured management key, install the decoded
/// domain/presence/forward-key routes, and reflood unchanged.
///
/// `NodeInfoAdvertise`'s wire envelope carries no `path` field (only
/// `seen_by`) — the hop path recorded for its installed routes is therefore
/// just `[from_peer]`, not a full reconstructed chain.
async fn handle_node_info(ctx: &RoutingContext, from_peer: AgentId, wire: NodeInfoAdvertise) {
    let engine = FloodEngine {
        self_id: ctx.streams.local_agent(),
        state: &ctx.flood_state,
        table: &ctx.cidr,
        ttl: ctx.route_ttl,
        known_peers: ctx.registry.known_peer_ids(),
    };

    let Some((new_path, reflood_to)) = engine.check_freshness(from_peer, wire.origin, wire.sequence, &[], &wire.seen_by)
    else {
        return;
    };

    let plaintext = if wire.encrypted {
        let Some(key) = &ctx.management_key else {
            tracing::warn!(peer = %from_peer, "dropping encrypted node_info: no management key configured");
            return;
        };
        match key.open(&wire.data) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(peer = %from_peer, %error, "dropping node_info with unreadable management-key envelope");
                return;
            }
        }
    } else {
        wire.data.to_vec()
    };

    let body = match mm_routing::nodeinfo::NodeInfoBody::decode(bytes::Bytes::from(plaintext)) {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(peer = %from_peer, %error, "dropping malformed node_info body");
            return;
        }
    };

    let expires_at = Instant::now() + ctx.route_ttl;
    mm_routing::nodeinfo::install(
        &ctx.domains,
        &ctx.presence,
        &ctx.forward_keys,
        wire.origin,
        from_peer,
        new_path,
        wire.sequence,
        expires_at,
        &body,
    );

    if reflood_to.is_empty() {
        return;
    }

    let mut new_seen_by = wire.seen_by.clone();
    new_seen_by.push(ctx.streams.local_agent());
    let out = NodeInfoAdvertise {
        origin: wire.origin,
        sequence: wire.sequence,
        encrypted: wire.encrypted,
        data: wire.data.clone(),
        seen_by: new_seen_by,
    };
    let encoded = out.encode();
    for peer in reflood_to {
        ctx.registry
            .send_control(peer, Frame::control(FrameType::NodeInfoAdvertise, encoded.clone()))
            .await;
    }
}
