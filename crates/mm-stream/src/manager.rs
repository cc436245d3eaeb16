//! The stream manager (C7): tracks every virtial-stream's lifecycle state,
//! correlates `STREAM_OPEN`/`STREAM_OPEN_ACK` by request id, forwards
//! transit traffic verbatim, and seals/opens `STREAM_DATA` at the two
//! endpoints of a stream.
//!
//! This crate never talks to `mm-peer` or `mm-exit` directly — it is handed
//! [`PeerSink`] implementations for registered peers and an optional
//! [`ExitHandler`] at construction/registration time, and calls back into
//! those traits. That keeps the dependency arrow pointing one way:
//! `mm-peer`/`mm-exit` depend on `mm-stream`, not the reverse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use mm_crypto::{generate_keypair, PrivateKey, PublicKey, SessionKey};
use mm_protocol::payload::{Address, StreamData, StreamOpen, StreamOpenAck, StreamOpenErr, StreamReset};
use mm_protocol::{AgentId, Flags, Frame, FrameType};

use crate::error::StreamError;
use crate::fairness::FairnessQueue;
use crate::forward::{ForwardTable, StreamKey};
use crate::ids::{RequestIdAllocator, StreamIdAllocator};

pub const MAX_STREAMS_PER_PEER: usize = 1_000;
pub const MAX_STREAMS_TOTAL: usize = 10_000;
pub const MAX_PENDING_OPENS: usize = 100;
pub const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

const SHARD_COUNT: usize = 16;

fn shard_of(key: &StreamKey) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// Where a registered peer's outbound frames go. Implemented by `mm-peer`'s
/// per-peer writer handle.
#[async_trait]
pub trait PeerSink: Send + Sync {
    async fn send_frame(&self, frame: Frame);
}

/// Where an endpoint stream's decrypted application bytes go. Implemented
/// by `mm-socks5` (ingress, client socket) and `mm-exit` (exit, upstream
/// TCP socket).
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn on_data(&self, data: Vec<u8>);
    async fn on_closed(&self, reason: Option<StreamError>);

    /// Handed a [`StreamHandle`] for this sink's own stream once the
    /// manager has finished registering it. `mm-socks5` already holds its
    /// handle from [`StreamManager::open`]'s return value and ignores this;
    /// `mm-exit` has no other way to get one, since its stream is opened by
    /// the remote side, not by a local `open()` call.
    async fn bind_handle(&self, _handle: StreamHandle) {}
}

/// Result of a successful exit-side open, handed back by an [`ExitHandler`].
pub struct ExitOpened {
    pub bound_addr: Address,
    pub bound_port: u16,
    pub ephemeral_pub: [u8; 32],
    pub session_key: SessionKey,
    pub sink: Arc<dyn StreamSink>,
}

/// Invoked when `remaining_path` is empty on an incoming `STREAM_OPEN` —
/// this agent is the exit. Implemented by `mm_exit::ExitHandler`.
#[async_trait]
pub trait ExitHandler: Send + Sync {
    async fn handle_open(&self, open: &StreamOpen) -> Result<ExitOpened, StreamError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamRole {
    Ingress,
    Transit,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    OpeningLocal,
    OpeningRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
}

/// Which side originated a `FIN_WRITE`: this stream's own local sink/opener,
/// or the peer it was received from. Distinguishes `close_local` (we sent
/// it) from `on_stream_close` (the peer sent it) so the two don't collapse
/// onto the same half-closed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Local,
    Remote,
}

struct StreamEntry {
    role: StreamRole,
    state: StreamState,
    request_id: u64,
    session_key: Option<Mutex<SessionKey>>,
    sink: Option<Arc<dyn StreamSink>>,
    write_closed_local: bool,
    write_closed_remote: bool,
}

struct PendingOpen {
    tx: oneshot::Sender<Result<(Address, u16), StreamError>>,
    ephemeral_priv: PrivateKey,
    ephemeral_pub: [u8; 32],
    key: StreamKey,
}

struct PeerLink {
    sink: Arc<dyn PeerSink>,
    allocator: StreamIdAllocator,
    fairness: Mutex<FairnessQueue>,
    multiplexed: bool,
    stream_count: AtomicUsize,
}

/// The sharded stream registry, forward table, and pending-open map for one
/// agent process.
pub struct StreamManager {
    local_agent: AgentId,
    shards: Vec<RwLock<HashMap<StreamKey, StreamEntry>>>,
    peers: RwLock<HashMap<AgentId, Arc<PeerLink>>>,
    forward: ForwardTable,
    pending: Mutex<HashMap<u64, PendingOpen>>,
    request_ids: RequestIdAllocator,
    total_streams: AtomicUsize,
    exit_handler: RwLock<Option<Arc<dyn ExitHandler>>>,
}

/// A handle to one endpoint-side (ingress or exit) stream, returned by
/// [`StreamManager::open`] and constructed internally for exit streams.
/// Sends plaintext; the manager owns sealing/framing.
#[derive(Clone)]
pub struct StreamHandle {
    manager: Arc<StreamManager>,
    key: StreamKey,
}

impl StreamHandle {
    pub async fn send(&self, plaintext: &[u8]) -> Result<(), StreamError> {
        self.manager.send_endpoint_data(self.key, plaintext).await
    }

    pub async fn close(&self) {
        self.manager.close_local(self.key, Flags::FIN_WRITE).await;
    }

    /// Force-close this stream as part of graceful shutdown; see
    /// [`StreamManager::shutdown_stream`].
    pub async fn shutdown(&self) {
        self.manager.shutdown_stream(self.key).await;
    }

    pub fn peer(&self) -> AgentId {
        self.key.peer
    }

    pub fn local_id(&self) -> u64 {
        self.key.local_id
    }
}

impl StreamManager {
    pub fn new(local_agent: AgentId) -> Arc<Self> {
        Arc::new(StreamManager {
            local_agent,
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            peers: RwLock::new(HashMap::new()),
            forward: ForwardTable::new(),
            pending: Mutex::new(HashMap::new()),
            request_ids: RequestIdAllocator::new(),
            total_streams: AtomicUsize::new(0),
            exit_handler: RwLock::new(None),
        })
    }

    pub fn set_exit_handler(&self, handler: Arc<dyn ExitHandler>) {
        *self.exit_handler.write() = Some(handler);
    }

    /// Register a connected peer. `we_are_dialer` picks this side's stream
    /// id parity for new streams opened *to* `peer` (§4.7): dialer = odd,
    /// listener = even.
    pub fn register_peer(&self, peer: AgentId, sink: Arc<dyn PeerSink>, we_are_dialer: bool, multiplexed: bool) {
        let allocator = if we_are_dialer {
            StreamIdAllocator::dialer()
        } else {
            StreamIdAllocator::listener()
        };
        self.peers.write().insert(
            peer,
            Arc::new(PeerLink {
                sink,
                allocator,
                fairness: Mutex::new(FairnessQueue::new()),
                multiplexed,
                stream_count: AtomicUsize::new(0),
            }),
        );
    }

    /// Tear down every stream touching `peer` (§4.6 "on disconnect"):
    /// endpoint streams get `on_closed`, transit streams' mates get
    /// `STREAM_RESET`.
    pub async fn unregister_peer(&self, peer: AgentId) {
        self.peers.write().remove(&peer);

        let mut local_closed = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.write();
            let stale: Vec<StreamKey> = guard.keys().filter(|k| k.peer == peer).copied().collect();
            for key in stale {
                if let Some(entry) = guard.remove(&key) {
                    if let Some(sink) = entry.sink {
                        local_closed.push(sink);
                    }
                }
            }
        }
        for sink in local_closed {
            sink.on_closed(Some(StreamError::GeneralFailure)).await;
        }

        for mate in self.forward.remove_peer(peer) {
            self.send_control(mate.peer, Frame::new(FrameType::StreamReset, Flags::empty(), mate.local_id, StreamReset { error_code: StreamError::GeneralFailure.to_wire_code() as u16 }.encode()))
                .await;
            self.remove_entry(mate);
        }
    }

    fn entry_shard(&self, key: &StreamKey) -> &RwLock<HashMap<StreamKey, StreamEntry>> {
        &self.shards[shard_of(key)]
    }

    fn remove_entry(&self, key: StreamKey) {
        if self.entry_shard(&key).write().remove(&key).is_some() {
            self.total_streams.fetch_sub(1, Ordering::Relaxed);
            if let Some(link) = self.peers.read().get(&key.peer) {
                link.stream_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    fn insert_entry(&self, key: StreamKey, entry: StreamEntry) -> Result<(), StreamError> {
        if self.total_streams.load(Ordering::Relaxed) >= MAX_STREAMS_TOTAL {
            return Err(StreamError::ResourceLimit);
        }
        let link = self.peers.read().get(&key.peer).cloned();
        if let Some(link) = &link {
            if link.stream_count.load(Ordering::Relaxed) >= MAX_STREAMS_PER_PEER {
                return Err(StreamError::ResourceLimit);
            }
        }
        self.entry_shard(&key).write().insert(key, entry);
        self.total_streams.fetch_add(1, Ordering::Relaxed);
        if let Some(link) = link {
            link.stream_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn send_control(&self, peer: AgentId, frame: Frame) {
        let link = self.peers.read().get(&peer).cloned();
        if let Some(link) = link {
            link.sink.send_frame(frame).await;
        } else {
            debug!(%peer, "dropping frame for unregistered peer");
        }
    }

    // -- Ingress: open a new stream -----------------------------------

    /// Open a stream toward `dest`:`port` along `path` (first hop = next
    /// peer to dial through; already resolved by the caller via C3). The
    /// returned handle seals outbound bytes with the derived session key;
    /// the `Address`/`u16` alongside it are the exit's bound address/port
    /// straight off the `STREAM_OPEN_ACK`, which `mm-socks5` echoes back to
    /// its client per §4.9.
    pub async fn open(
        self: &Arc<Self>,
        path: Vec<AgentId>,
        dest: Address,
        port: u16,
        sink: Arc<dyn StreamSink>,
    ) -> Result<(StreamHandle, Address, u16), StreamError> {
        let first_hop = *path.first().ok_or(StreamError::NoRoute)?;
        let remaining_path = path[1..].to_vec();
        let ttl = u8::try_from(path.len() + 1).unwrap_or(255);

        let link = self.peers.read().get(&first_hop).cloned().ok_or(StreamError::NoRoute)?;
        let local_id = link.allocator.next();
        let key = StreamKey::new(first_hop, local_id);

        {
            let mut pending = self.pending.lock();
            if pending.len() >= MAX_PENDING_OPENS {
                return Err(StreamError::ResourceLimit);
            }
        }

        self.insert_entry(
            key,
            StreamEntry {
                role: StreamRole::Ingress,
                state: StreamState::OpeningLocal,
                request_id: 0,
                session_key: None,
                sink: Some(sink),
                write_closed_local: false,
                write_closed_remote: false,
        },
        )?;

        let request_id = self.request_ids.next();
        let mut rng = rand::rngs::OsRng;
        let (ephemeral_priv, ephemeral_pub) = generate_keypair(&mut rng);
        let ephemeral_pub_bytes = ephemeral_pub.to_bytes();

        if let Some(entry) = self.entry_shard(&key).write().get_mut(&key) {
            entry.request_id = request_id;
        }

        let open = StreamOpen {
            request_id,
            addr: dest,
            port,
            ttl,
            remaining_path,
            ephemeral_pub: ephemeral_pub_bytes,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id,
            PendingOpen {
                tx,
                ephemeral_priv,
                ephemeral_pub: ephemeral_pub_bytes,
                key,
            },
        );

        link.sink
            .send_frame(Frame::new(FrameType::StreamOpen, Flags::empty(), local_id, open.encode()))
            .await;

        let outcome = tokio::time::timeout(STREAM_OPEN_TIMEOUT, rx).await;
        match outcome {
            Ok(Ok(Ok((bound_addr, bound_port)))) => {
                Ok((StreamHandle { manager: self.clone(), key }, bound_addr, bound_port))
            }
            Ok(Ok(Err(e))) => {
                self.remove_entry(key);
                Err(e)
            }
            Ok(Err(_canceled)) | Err(_timeout) => {
                self.pending.lock().remove(&request_id);
                self.remove_entry(key);
                Err(StreamError::OpenTimeout)
            }
        }
    }

    // -- Peer reader dispatch ------------------------------------------

    pub async fn on_stream_open(self: &Arc<Self>, from_peer: AgentId, inbound_stream_id: u64, open: StreamOpen) {
        let inbound_key = StreamKey::new(from_peer, inbound_stream_id);

        if open.remaining_path.is_empty() {
            self.handle_exit_open(from_peer, inbound_key, open).await;
            return;
        }

        if open.ttl == 0 {
            self.reply_open_err(from_peer, inbound_stream_id, open.request_id, StreamError::TtlExceeded).await;
            return;
        }

        let next_hop = open.remaining_path[0];
        let Some(next_link) = self.peers.read().get(&next_hop).cloned() else {
            self.reply_open_err(from_peer, inbound_stream_id, open.request_id, StreamError::NoRoute).await;
            return;
        };

        let outbound_id = next_link.allocator.next();
        let outbound_key = StreamKey::new(next_hop, outbound_id);

        if let Err(e) = self.insert_entry(
            inbound_key,
            StreamEntry {
                role: StreamRole::Transit,
                state: StreamState::OpeningRemote,
                request_id: open.request_id,
                session_key: None,
                sink: None,
                write_closed_local: false,
                write_closed_remote: false,
        },
        ) {
            self.reply_open_err(from_peer, inbound_stream_id, open.request_id, e).await;
            return;
        }
        if let Err(e) = self.insert_entry(
            outbound_key,
            StreamEntry {
                role: StreamRole::Transit,
                state: StreamState::OpeningLocal,
                request_id: open.request_id,
                session_key: None,
                sink: None,
                write_closed_local: false,
                write_closed_remote: false,
        },
        ) {
            self.remove_entry(inbound_key);
            self.reply_open_err(from_peer, inbound_stream_id, open.request_id, e).await;
            return;
        }

        self.forward.link(inbound_key, outbound_key);

        let forwarded = StreamOpen {
            request_id: open.request_id,
            addr: open.addr,
            port: open.port,
            ttl: open.ttl - 1,
            remaining_path: open.remaining_path[1..].to_vec(),
            ephemeral_pub: open.ephemeral_pub,
        };
        next_link
            .sink
            .send_frame(Frame::new(FrameType::StreamOpen, Flags::empty(), outbound_id, forwarded.encode()))
            .await;
    }

    async fn handle_exit_open(self: &Arc<Self>, from_peer: AgentId, inbound_key: StreamKey, open: StreamOpen) {
        let handler = self.exit_handler.read().clone();
        let Some(handler) = handler else {
            self.reply_open_err(from_peer, inbound_key.local_id, open.request_id, StreamError::ExitDisabled).await;
            return;
        };

        let request_id = open.request_id;
        match handler.handle_open(&open).await {
            Ok(opened) => {
                let sink = opened.sink.clone();
                if let Err(e) = self.insert_entry(
                    inbound_key,
                    StreamEntry {
                        role: StreamRole::Exit,
                        state: StreamState::Open,
                        request_id,
                        session_key: Some(Mutex::new(opened.session_key)),
                        sink: Some(opened.sink),
                        write_closed_local: false,
                        write_closed_remote: false,
                },
                ) {
                    self.reply_open_err(from_peer, inbound_key.local_id, request_id, e).await;
                    return;
                }
                sink.bind_handle(StreamHandle { manager: self.clone(), key: inbound_key }).await;
                let ack = StreamOpenAck {
                    request_id,
                    bound_addr: opened.bound_addr,
                    bound_port: opened.bound_port,
                    ephemeral_pub: opened.ephemeral_pub,
                };
                self.send_control(from_peer, Frame::new(FrameType::StreamOpenAck, Flags::empty(), inbound_key.local_id, ack.encode()))
                    .await;
            }
            Err(e) => {
                self.reply_open_err(from_peer, inbound_key.local_id, request_id, e).await;
            }
        }
    }

    async fn reply_open_err(&self, peer: AgentId, stream_id: u64, request_id: u64, err: StreamError) {
        let payload = StreamOpenErr {
            request_id,
            error_code: err.to_wire_code() as u16,
            message: err.to_string(),
        };
        self.send_control(peer, Frame::new(FrameType::StreamOpenErr, Flags::empty(), stream_id, payload.encode()))
            .await;
    }

    pub async fn on_stream_open_ack(&self, from_peer: AgentId, inbound_stream_id: u64, ack: StreamOpenAck) {
        let inbound_key = StreamKey::new(from_peer, inbound_stream_id);

        // Transit: forward the ack upstream to the mate.
        if let Some(mate) = self.forward.mate_of(inbound_key) {
            if let Some(entry) = self.entry_shard(&inbound_key).write().get_mut(&inbound_key) {
                entry.state = StreamState::Open;
            }
            if let Some(entry) = self.entry_shard(&mate).write().get_mut(&mate) {
                entry.state = StreamState::Open;
            }
            self.send_control(mate.peer, Frame::new(FrameType::StreamOpenAck, Flags::empty(), mate.local_id, ack.encode()))
                .await;
            return;
        }

        // Ingress: complete the pending open.
        let pending = self.pending.lock().remove(&ack.request_id);
        let Some(pending) = pending else {
            warn!(request_id = ack.request_id, "stream_open_ack for unknown request, ignoring");
            return;
        };
        let Ok(exit_pub) = PublicKey::from_bytes(ack.ephemeral_pub).require_nonzero() else {
            self.remove_entry(pending.key);
            let _ = pending.tx.send(Err(StreamError::AeadFailure));
            return;
        };
        let shared = pending.ephemeral_priv.diffie_hellman(&exit_pub);
        let session_key = mm_crypto::derive_session_key(&shared, ack.request_id, pending.ephemeral_pub, ack.ephemeral_pub, true);

        if let Some(entry) = self.entry_shard(&pending.key).write().get_mut(&pending.key) {
            entry.state = StreamState::Open;
            entry.session_key = Some(Mutex::new(session_key));
        }
        let _ = pending.tx.send(Ok((ack.bound_addr, ack.bound_port)));
    }

    pub async fn on_stream_open_err(&self, from_peer: AgentId, inbound_stream_id: u64, err: StreamOpenErr) {
        let inbound_key = StreamKey::new(from_peer, inbound_stream_id);
        let error = stream_error_from_wire(err.error_code);

        if let Some(mate) = self.forward.mate_of(inbound_key) {
            self.forward.unlink(inbound_key);
            self.remove_entry(inbound_key);
            self.remove_entry(mate);
            self.send_control(mate.peer, Frame::new(FrameType::StreamOpenErr, Flags::empty(), mate.local_id, err.encode()))
                .await;
            return;
        }

        if let Some(pending) = self.pending.lock().remove(&err.request_id) {
            self.remove_entry(pending.key);
            let _ = pending.tx.send(Err(error));
        }
    }

    pub async fn on_stream_data(&self, from_peer: AgentId, stream_id: u64, data: StreamData) {
        let key = StreamKey::new(from_peer, stream_id);

        if let Some(mate) = self.forward.mate_of(key) {
            // Transit: forward the encrypted envelope verbatim, never decrypt.
            self.send_control(mate.peer, Frame::new(FrameType::StreamData, Flags::empty(), mate.local_id, data.encode()))
                .await;
            return;
        }

        let opened = {
            let shard = self.entry_shard(&key).read();
            shard.get(&key).and_then(|entry| {
                entry.session_key.as_ref().map(|k| {
                    let mut key = k.lock();
                    key.open(data.nonce, &data.ciphertext_and_tag)
                })
            })
        };
        match opened {
            Some(Ok(plaintext)) => {
                let sink = self.entry_shard(&key).read().get(&key).and_then(|e| e.sink.clone());
                if let Some(sink) = sink {
                    sink.on_data(plaintext).await;
                }
            }
            Some(Err(_)) => {
                self.reset_stream(key, StreamError::AeadFailure).await;
            }
            None => {
                debug!(%from_peer, stream_id, "stream_data for unknown stream, resetting sender");
                self.send_control(from_peer, Frame::new(FrameType::StreamReset, Flags::empty(), stream_id, StreamReset { error_code: StreamError::StreamNotFound.to_wire_code() as u16 }.encode()))
                    .await;
            }
        }
    }

    pub async fn on_stream_close(&self, from_peer: AgentId, stream_id: u64, flags: Flags) {
        let key = StreamKey::new(from_peer, stream_id);

        if let Some(mate) = self.forward.mate_of(key) {
            self.send_control(mate.peer, Frame::new(FrameType::StreamClose, flags, mate.local_id, bytes::Bytes::new()))
                .await;
            // `key` received FIN_WRITE from `from_peer` (remote); forwarding
            // it to `mate` is this side sending FIN_WRITE onward (local).
            let inbound_closed = self.apply_half_close(key, Direction::Remote, flags);
            let outbound_closed = self.apply_half_close(mate, Direction::Local, flags);
            if inbound_closed {
                self.remove_entry(key);
            }
            if outbound_closed {
                self.remove_entry(mate);
            }
            if inbound_closed && outbound_closed {
                self.forward.unlink(key);
            }
            return;
        }

        let fully_closed = self.apply_half_close(key, Direction::Remote, flags);
        if fully_closed {
            let sink = self.entry_shard(&key).write().remove(&key).and_then(|e| e.sink);
            self.remove_closed_bookkeeping(key);
            if let Some(sink) = sink {
                sink.on_closed(None).await;
            }
        }
    }

    /// Record a `FIN_WRITE` for `direction` on `key`'s entry. Returns `true`
    /// once both `write_closed_local` and `write_closed_remote` have been
    /// independently observed, at which point the stream is fully closed
    /// and the caller is responsible for removing it.
    fn apply_half_close(&self, key: StreamKey, direction: Direction, flags: Flags) -> bool {
        if !flags.contains(Flags::FIN_WRITE) {
            return false;
        }
        let mut shard = self.entry_shard(&key).write();
        let Some(entry) = shard.get_mut(&key) else { return false };
        match direction {
            Direction::Local => entry.write_closed_local = true,
            Direction::Remote => entry.write_closed_remote = true,
        }
        if entry.write_closed_local && entry.write_closed_remote {
            return true;
        }
        entry.state = if entry.write_closed_local {
            StreamState::HalfClosedLocal
        } else {
            StreamState::HalfClosedRemote
        };
        false
    }

    fn remove_closed_bookkeeping(&self, key: StreamKey) {
        self.forward.unlink(key);
        if self.total_streams.load(Ordering::Relaxed) > 0 {
            self.total_streams.fetch_sub(1, Ordering::Relaxed);
        }
        if let Some(link) = self.peers.read().get(&key.peer) {
            link.stream_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub async fn on_stream_reset(&self, from_peer: AgentId, stream_id: u64, reset: StreamReset) {
        let key = StreamKey::new(from_peer, stream_id);
        self.reset_stream(key, stream_error_from_wire(reset.error_code)).await;
    }

    async fn reset_stream(&self, key: StreamKey, reason: StreamError) {
        if let Some(mate) = self.forward.mate_of(key) {
            self.forward.unlink(key);
            self.remove_entry(mate);
            self.send_control(mate.peer, Frame::new(FrameType::StreamReset, Flags::empty(), mate.local_id, StreamReset { error_code: reason.to_wire_code() as u16 }.encode()))
                .await;
        }
        let sink = self.entry_shard(&key).write().remove(&key).and_then(|e| e.sink);
        self.remove_closed_bookkeeping(key);
        if let Some(sink) = sink {
            sink.on_closed(Some(reason)).await;
        }
    }

    // -- Endpoint-side outbound data ------------------------------------

    async fn send_endpoint_data(&self, key: StreamKey, plaintext: &[u8]) -> Result<(), StreamError> {
        let sealed = {
            let shard = self.entry_shard(&key).read();
            let entry = shard.get(&key).ok_or(StreamError::StreamNotFound)?;
            let session_key = entry.session_key.as_ref().ok_or(StreamError::StreamNotFound)?;
            session_key.lock().seal(plaintext)
        };
        let data = StreamData {
            nonce: sealed.nonce,
            ciphertext_and_tag: bytes::Bytes::from(sealed.ciphertext_and_tag),
        };
        self.send_control(key.peer, Frame::new(FrameType::StreamData, Flags::empty(), key.local_id, data.encode()))
            .await;
        Ok(())
    }

    async fn close_local(&self, key: StreamKey, flags: Flags) {
        self.send_control(key.peer, Frame::new(FrameType::StreamClose, flags, key.local_id, bytes::Bytes::new()))
            .await;
        if self.apply_half_close(key, Direction::Local, flags) {
            let sink = self.entry_shard(&key).write().remove(&key).and_then(|e| e.sink);
            self.remove_closed_bookkeeping(key);
            if let Some(sink) = sink {
                sink.on_closed(None).await;
            }
        }
    }

    pub fn local_agent(&self) -> AgentId {
        self.local_agent
    }

    /// Force-close one locally-owned stream as part of graceful shutdown
    /// (§4.11 step b): sends `STREAM_CLOSE` with both `FIN_WRITE` and
    /// `FIN_READ` set, since this agent is tearing the stream down entirely
    /// rather than half-closing one direction, and delivers `on_closed(None)`
    /// to the sink immediately instead of waiting for the peer to echo its
    /// own half — the process is exiting and won't be around to see it.
    pub async fn shutdown_stream(&self, key: StreamKey) {
        self.send_control(
            key.peer,
            Frame::new(FrameType::StreamClose, Flags::FIN_WRITE | Flags::FIN_READ, key.local_id, bytes::Bytes::new()),
        )
        .await;
        let sink = self.entry_shard(&key).write().remove(&key).and_then(|e| e.sink);
        self.remove_closed_bookkeeping(key);
        if let Some(sink) = sink {
            sink.on_closed(None).await;
        }
    }

    /// Handles for every locally-owned (ingress or exit) stream currently
    /// tracked, i.e. every entry with a sink attached. Transit streams have
    /// no sink and are excluded — their mates see the close when the owning
    /// agent's own endpoint closes. Used by graceful shutdown to send
    /// `STREAM_CLOSE` on every stream before peer connections are torn down.
    pub fn local_stream_handles(self: &Arc<Self>) -> Vec<StreamHandle> {
        let mut handles = Vec::new();
        for shard in &self.shards {
            let guard = shard.read();
            for (key, entry) in guard.iter() {
                if entry.sink.is_some() {
                    handles.push(StreamHandle { manager: self.clone(), key: *key });
                }
            }
        }
        handles
    }
}

impl Clone for PeerLink {
    fn clone(&self) -> Self {
        unreachable!("PeerLink is only ever cloned as Arc<PeerLink>")
    }
}

fn stream_error_from_wire(code: u16) -> StreamError {
    use mm_protocol::ErrorCode;
    match ErrorCode::from_u16(code) {
        Some(ErrorCode::NoRoute) => StreamError::NoRoute,
        Some(ErrorCode::ConnectionRefused) => StreamError::ConnectionRefused,
        Some(ErrorCode::ConnectionTimeout) => StreamError::ConnectionTimeout,
        Some(ErrorCode::TtlExceeded) => StreamError::TtlExceeded,
        Some(ErrorCode::HostUnreachable) => StreamError::HostUnreachable,
        Some(ErrorCode::NetworkUnreachable) => StreamError::NetworkUnreachable,
        Some(ErrorCode::DnsError) => StreamError::DnsError,
        Some(ErrorCode::ExitDisabled) => StreamError::ExitDisabled,
        Some(ErrorCode::ResourceLimit) => StreamError::ResourceLimit,
        Some(ErrorCode::NotAllowed) => StreamError::NotAllowed,
        Some(ErrorCode::GeneralFailure) | None => StreamError::GeneralFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestSink {
        closed: Mutex<Vec<Option<StreamError>>>,
    }

    #[async_trait]
    impl StreamSink for TestSink {
        async fn on_data(&self, _data: Vec<u8>) {}
        async fn on_closed(&self, reason: Option<StreamError>) {
            self.closed.lock().push(reason);
        }
    }

    #[derive(Default)]
    struct RecordingPeerSink {
        frames: Mutex<Vec<Frame>>,
    }

    #[async_trait]
    impl PeerSink for RecordingPeerSink {
        async fn send_frame(&self, frame: Frame) {
            self.frames.lock().push(frame);
        }
    }

    fn aid(b: u8) -> AgentId {
        AgentId::from_bytes([b; 16])
    }

    fn open_endpoint_entry(sink: Arc<dyn StreamSink>) -> StreamEntry {
        StreamEntry {
            role: StreamRole::Ingress,
            state: StreamState::Open,
            request_id: 1,
            session_key: None,
            sink: Some(sink),
            write_closed_local: false,
            write_closed_remote: false,
        }
    }

    #[tokio::test]
    async fn local_then_remote_fin_write_closes_exactly_once() {
        let manager = StreamManager::new(aid(1));
        let peer = aid(2);
        manager.register_peer(peer, Arc::new(RecordingPeerSink::default()), false, false);

        let key = StreamKey::new(peer, 2);
        let sink = Arc::new(TestSink::default());
        manager.insert_entry(key, open_endpoint_entry(sink.clone())).unwrap();
        let handle = StreamHandle { manager: manager.clone(), key };

        handle.close().await;
        assert!(sink.closed.lock().is_empty(), "half-closed after only one direction must stay open");

        manager.on_stream_close(peer, key.local_id, Flags::FIN_WRITE).await;
        let closed = sink.closed.lock();
        assert_eq!(closed.len(), 1, "on_closed must fire exactly once");
        assert_eq!(closed[0], None);
    }

    #[tokio::test]
    async fn remote_then_local_fin_write_closes_exactly_once() {
        let manager = StreamManager::new(aid(1));
        let peer = aid(2);
        manager.register_peer(peer, Arc::new(RecordingPeerSink::default()), false, false);

        let key = StreamKey::new(peer, 2);
        let sink = Arc::new(TestSink::default());
        manager.insert_entry(key, open_endpoint_entry(sink.clone())).unwrap();
        let handle = StreamHandle { manager: manager.clone(), key };

        manager.on_stream_close(peer, key.local_id, Flags::FIN_WRITE).await;
        assert!(sink.closed.lock().is_empty(), "half-closed after only one direction must stay open");

        handle.close().await;
        let closed = sink.closed.lock();
        assert_eq!(closed.len(), 1, "on_closed must fire exactly once");
        assert_eq!(closed[0], None);
    }

    #[tokio::test]
    async fn transit_pair_closes_fully_once_both_directions_observed() {
        let manager = StreamManager::new(aid(1));
        let upstream = aid(2);
        let downstream = aid(3);
        let upstream_sink = Arc::new(RecordingPeerSink::default());
        let downstream_sink = Arc::new(RecordingPeerSink::default());
        manager.register_peer(upstream, upstream_sink.clone(), false, false);
        manager.register_peer(downstream, downstream_sink.clone(), true, false);

        let inbound = StreamKey::new(upstream, 2);
        let outbound = StreamKey::new(downstream, 1);
        let transit_entry = || StreamEntry {
            role: StreamRole::Transit,
            state: StreamState::Open,
            request_id: 1,
            session_key: None,
            sink: None,
            write_closed_local: false,
            write_closed_remote: false,
        };
        manager.insert_entry(inbound, transit_entry()).unwrap();
        manager.insert_entry(outbound, transit_entry()).unwrap();
        manager.forward.link(inbound, outbound);

        // Upstream's FIN_WRITE on the inbound leg is forwarded downstream;
        // only one direction has been observed on each leg so far.
        manager.on_stream_close(upstream, inbound.local_id, Flags::FIN_WRITE).await;
        assert_eq!(downstream_sink.frames.lock().len(), 1, "fin must be forwarded to the mate");
        assert!(!manager.forward.is_empty(), "link survives a single direction closing");

        // Downstream's FIN_WRITE on the outbound leg completes both legs.
        manager.on_stream_close(downstream, outbound.local_id, Flags::FIN_WRITE).await;
        assert_eq!(upstream_sink.frames.lock().len(), 1, "fin must be forwarded back upstream");
        assert!(manager.forward.is_empty(), "both directions closed, the link is torn down");
    }
}
