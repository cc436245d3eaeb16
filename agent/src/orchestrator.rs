//! C11: the agent orchestrator. Owns the identity, a validated config
//! snapshot, the shared routing/stream state (§4.2's `RoutingContext`), and
//! every running peer connection, and drives the process's periodic
//! background work (route re-advertisement, route-table expiry).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use mm_config::{Config, Identity, ListenerConfig, PeerConfig, Socks5AuthConfig};
use mm_exit::{ExitAllowlist, TcpExitHandler};
use mm_peer::connection::{self, ConnectionState, PeerConnection, PeerConnectionConfig};
use mm_peer::{BackoffConfig, PeerRegistry, RoutingContext};
use mm_protocol::{AgentId, Frame, FrameType};
use mm_routing::flood::FloodState;
use mm_routing::{AgentPresenceTable, CidrTable, DomainTable, ForwardKeyTable};
use mm_socks5::{Auth, Socks5Listener};
use mm_stream::StreamManager;
use mm_transport::Transport;

use crate::advertise::{build_node_info_advertise, build_route_advertise};
use crate::error::AgentError;
use crate::transports;

/// Capabilities this build advertises in `PEER_HELLO` (§4.6). Plain
/// strings rather than a bitfield, since the handshake payload carries them
/// as a length-prefixed string list and new capabilities shouldn't require
/// renumbering anything.
const CAPABILITIES: &[&str] = &["stream", "route-advertise", "node-info"];

/// Bound on how long graceful shutdown waits for peer connections to settle
/// before giving up and returning anyway (§5).
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

pub struct Orchestrator {
    identity: Identity,
    config: Config,
    ctx: RoutingContext,
    shutdown: CancellationToken,
    peers: Mutex<Vec<PeerConnection>>,
    self_sequence: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: Config, identity: Identity) -> Arc<Self> {
        let streams = StreamManager::new(identity.agent_id);

        if config.exit.enabled {
            let allowlist = ExitAllowlist::new(config.exit.routes.clone());
            let handler = TcpExitHandler::new(allowlist, config.exit.dns.servers.clone(), config.exit.dns.timeout);
            streams.set_exit_handler(Arc::new(handler));
        }

        let ctx = RoutingContext {
            cidr: Arc::new(CidrTable::new()),
            domains: Arc::new(DomainTable::new()),
            presence: Arc::new(AgentPresenceTable::new()),
            forward_keys: Arc::new(ForwardKeyTable::new()),
            flood_state: Arc::new(FloodState::new()),
            management_key: None,
            route_ttl: config.routing.route_ttl,
            registry: Arc::new(PeerRegistry::new()),
            streams,
        };

        Arc::new(Orchestrator {
            identity,
            config,
            ctx,
            shutdown: CancellationToken::new(),
            peers: Mutex::new(Vec::new()),
            self_sequence: AtomicU64::new(1),
        })
    }

    pub fn routing_context(&self) -> &RoutingContext {
        &self.ctx
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn peer_connection_config(&self, expected_agent_id: Option<AgentId>) -> PeerConnectionConfig {
        PeerConnectionConfig {
            local_agent: self.identity.agent_id,
            capabilities: CAPABILITIES.iter().map(|s| (*s).to_owned()).collect(),
            expected_agent_id,
            idle_threshold: self.config.connections.idle_threshold,
            keepalive_timeout: self.config.connections.timeout,
            backoff: BackoffConfig {
                initial: self.config.connections.reconnect.initial_delay,
                max: self.config.connections.reconnect.max_delay,
                multiplier: self.config.connections.reconnect.multiplier,
                jitter: self.config.connections.reconnect.jitter,
                max_retries: self.config.connections.reconnect.max_retries,
            },
        }
    }

    /// Dial one configured peer over `transport`, keeping it reconnected
    /// with backoff until [`Orchestrator::begin_shutdown`] is called.
    pub fn dial_peer(self: &Arc<Self>, transport: Arc<dyn Transport>, peer: &PeerConfig) -> PeerConnection {
        let pc_config = self.peer_connection_config(peer.expected_agent_id);
        connection::dial(peer.address.clone(), transport, pc_config, self.ctx.clone())
    }

    /// Bind `listener` on `transport` and spawn an accept loop that hands
    /// every inbound connection to [`mm_peer::connection::accept`]. Runs
    /// until the orchestrator's shutdown token fires.
    pub async fn spawn_listener(self: &Arc<Self>, transport: Arc<dyn Transport>, listener: &ListenerConfig) -> Result<(), AgentError> {
        let bound = transport
            .listen(&listener.address)
            .await
            .map_err(AgentError::Transport)?;
        tracing::info!(address = %listener.address, transport = ?listener.transport, "listener bound");

        let this = self.clone();
        let shutdown = self.shutdown.clone();
        let address = listener.address.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    result = bound.accept() => result,
                    () = shutdown.cancelled() => return,
                };
                match accepted {
                    Ok(inbound) => {
                        let pc_config = this.peer_connection_config(None);
                        let peer = connection::accept(inbound, pc_config, this.ctx.clone());
                        this.peers.lock().push(peer);
                    }
                    Err(error) => {
                        tracing::warn!(%address, %error, "listener accept failed");
                    }
                }
            }
        });

        Ok(())
    }

    /// Start the SOCKS5 ingress (C9) if `config.socks5.enabled`.
    pub fn spawn_socks5(self: &Arc<Self>) {
        if !self.config.socks5.enabled {
            return;
        }
        let auth = self.config.socks5.auth.as_ref().map(|Socks5AuthConfig { username, password }| Auth {
            username: username.clone(),
            password: password.clone(),
        });
        let listener = Arc::new(Socks5Listener::new(self.ctx.clone(), auth));
        let address = self.config.socks5.address.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.serve(&address).await {
                tracing::error!(%address, %error, "socks5 listener stopped");
            }
        });
    }

    /// Every `routing.advertise_interval`, flood this agent's own exit
    /// routes (if any) and presence (always) to every connected peer (§4.4).
    /// Sends one round immediately on startup so a freshly joined agent
    /// doesn't wait a full interval before becoming reachable.
    pub fn spawn_periodic_advertise(self: &Arc<Self>) {
        let this = self.clone();
        let interval = self.config.routing.advertise_interval;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                this.advertise_self().await;
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = shutdown.cancelled() => return,
                }
            }
        });
    }

    async fn advertise_self(&self) {
        let sequence = self.self_sequence.fetch_add(1, Ordering::SeqCst);
        let peers = self.ctx.registry.known_peer_ids();
        if peers.is_empty() {
            return;
        }

        if let Some(advertise) = build_route_advertise(self.identity.agent_id, sequence, &self.config.exit.routes) {
            let frame = Frame::control(FrameType::RouteAdvertise, advertise.encode());
            for peer in &peers {
                self.ctx.registry.send_control(*peer, frame.clone()).await;
            }
        }

        let node_info = build_node_info_advertise(self.identity.agent_id, sequence, self.ctx.management_key.as_deref());
        let frame = Frame::control(FrameType::NodeInfoAdvertise, node_info.encode());
        for peer in &peers {
            self.ctx.registry.send_control(*peer, frame.clone()).await;
        }
    }

    /// Every half the configured route TTL (capped at 60s so a long TTL
    /// doesn't leave stale entries lingering for minutes after expiry),
    /// sweep every route table for entries past their `expires_at` (§4.3).
    pub fn spawn_periodic_expiry(self: &Arc<Self>) {
        let this = self.clone();
        let tick = (self.config.routing.route_ttl / 2).min(Duration::from_secs(60)).max(Duration::from_secs(1));
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(tick) => {}
                    () = shutdown.cancelled() => return,
                }
                let now = Instant::now();
                let expired_cidr = this.ctx.cidr.expire(now).len();
                let expired_domains = this.ctx.domains.expire(now).len();
                let expired_presence = this.ctx.presence.expire(now).len();
                let expired_keys = this.ctx.forward_keys.expire(now).len();
                if expired_cidr + expired_domains + expired_presence + expired_keys > 0 {
                    tracing::debug!(
                        expired_cidr,
                        expired_domains,
                        expired_presence,
                        expired_keys,
                        "swept expired routes"
                    );
                }
            }
        });
    }

    /// Build every configured transport, bind every listener, dial every
    /// configured peer, start the SOCKS5 ingress and periodic background
    /// tasks, then run until `shutdown_signal` resolves.
    pub async fn run(self: Arc<Self>, shutdown_signal: impl std::future::Future<Output = ()>) -> Result<(), AgentError> {
        let transports = transports::build(&self.config)?;

        for listener in self.config.listeners.clone() {
            let transport = transports::find(&transports, listener.transport);
            self.spawn_listener(transport, &listener).await?;
        }

        for peer in self.config.peers.clone() {
            let transport = transports::find(&transports, peer.transport);
            let connection = self.dial_peer(transport, &peer);
            self.peers.lock().push(connection);
        }

        self.spawn_socks5();
        self.spawn_periodic_advertise();
        self.spawn_periodic_expiry();

        shutdown_signal.await;
        self.shutdown_gracefully().await;
        Ok(())
    }

    /// Graceful shutdown (§4.11): cancel every background task (closing
    /// listeners and the SOCKS5 accept loop), send `STREAM_CLOSE` on every
    /// locally-owned stream, then disconnect peers and wait (bounded by
    /// [`SHUTDOWN_DEADLINE`]) for them to report disconnected.
    pub async fn shutdown_gracefully(&self) {
        tracing::info!("shutting down");
        self.shutdown.cancel();

        let local_streams = self.ctx.streams.local_stream_handles();
        if !local_streams.is_empty() {
            tracing::debug!(count = local_streams.len(), "sending stream_close to local streams");
            for stream in local_streams {
                stream.shutdown().await;
            }
        }

        let watches: Vec<watch::Receiver<ConnectionState>> = {
            let peers = self.peers.lock();
            for peer in peers.iter() {
                peer.shutdown();
            }
            peers.iter().map(PeerConnection::subscribe).collect()
        };

        let wait_all = async {
            for mut rx in watches {
                let _ = rx.wait_for(|state| *state == ConnectionState::Disconnected).await;
            }
        };

        if tokio::time::timeout(SHUTDOWN_DEADLINE, wait_all).await.is_err() {
            tracing::warn!("shutdown deadline elapsed with peer connections still unwinding");
        }
    }
}
