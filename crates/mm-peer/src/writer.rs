//! Writer-side frame sink for one peer connection (§4.6, §4.8).
//!
//! Two transport shapes need two different plumbings behind the same
//! [`PeerSink`] interface the stream manager sends frames through:
//!
//! - Native-multiplex transports (QUIC) hand every virtual stream its own
//!   transport-level bidirectional stream. [`spawn_multiplexed`] keeps a
//!   registry of `stream_id -> substream` and opens/accepts substreams
//!   lazily as stream ids come and go.
//! - Single-stream transports (h2, WebSocket) carry every virtual stream
//!   multiplexed over one shared byte stream. [`spawn_single_stream`] uses
//!   [`FairnessQueue`] to round-robin `STREAM_DATA` frames; everything else
//!   (opens, acks, resets, half-closes, peer-level control) goes out
//!   immediately, ahead of any buffered data.
//!
//! Only `STREAM_DATA` frames are ever subject to fairness; every other frame
//! type is small, rare, and lifecycle-critical enough to bypass it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mm_protocol::{AgentId, Frame, FrameCodec, FrameType};
use mm_stream::{FairnessQueue, PeerSink};
use mm_transport::{ByteStream, Connection};
use parking_lot::Mutex;
use tokio::io::WriteHalf;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Handle every in-process caller holds to push frames at one peer. Cheap to
/// share via `Arc`; the transport I/O itself lives in the tasks
/// `spawn_multiplexed`/`spawn_single_stream` start.
pub struct PeerWriterHandle {
    control_tx: mpsc::UnboundedSender<Frame>,
    data_tx: mpsc::UnboundedSender<Frame>,
}

impl PeerWriterHandle {
    /// Send a frame known ahead of time to be control traffic, skipping the
    /// `FrameType` check `send_frame` does. Used by [`crate::registry::PeerRegistry::send_control`]
    /// for best-effort reflood delivery.
    pub async fn send_control_frame(&self, frame: Frame) {
        let _ = self.control_tx.send(frame);
    }
}

#[async_trait]
impl PeerSink for PeerWriterHandle {
    async fn send_frame(&self, frame: Frame) {
        if frame.header.frame_type == FrameType::StreamData {
            let _ = self.data_tx.send(frame);
        } else {
            let _ = self.control_tx.send(frame);
        }
    }
}

type SubstreamRegistry = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<Frame>>>>;

/// Spawn the writer/reader machinery for a peer whose transport natively
/// multiplexes virtual streams onto dedicated transport streams. `control_stream`
/// is the already-handshaken substream that carries stream id 0 (peer-level
/// control traffic); every other substream is opened or accepted as its
/// stream id comes up.
pub fn spawn_multiplexed(
    connection: Arc<dyn Connection>,
    peer_id: AgentId,
    control_stream: Box<dyn ByteStream>,
    inbound_tx: mpsc::UnboundedSender<(AgentId, Frame)>,
) -> Arc<PeerWriterHandle> {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let registry: SubstreamRegistry = Arc::new(Mutex::new(HashMap::new()));

    spawn_known_substream(peer_id, 0, control_stream, registry.clone(), inbound_tx.clone());

    tokio::spawn(run_accept_loop(
        connection.clone(),
        peer_id,
        registry.clone(),
        inbound_tx.clone(),
    ));
    tokio::spawn(run_multiplexed_router(
        connection, peer_id, registry, inbound_tx, control_rx, data_rx,
    ));

    Arc::new(PeerWriterHandle { control_tx, data_tx })
}

/// Spawn the writer/reader machinery for a peer whose transport carries
/// every virtual stream over one shared byte stream. `byte_stream` is the
/// already-handshaken connection; it is never torn down and reopened, it
/// simply carries every subsequent frame.
pub fn spawn_single_stream(
    peer_id: AgentId,
    byte_stream: Box<dyn ByteStream>,
    inbound_tx: mpsc::UnboundedSender<(AgentId, Frame)>,
) -> Arc<PeerWriterHandle> {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (read_half, write_half) = tokio::io::split(byte_stream);
    let mut reader = FramedRead::new(read_half, FrameCodec::new());
    let writer = FramedWrite::new(write_half, FrameCodec::new());

    tokio::spawn(async move {
        while let Some(result) = reader.next().await {
            match result {
                Ok(frame) => {
                    if inbound_tx.send((peer_id, frame)).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(peer = %peer_id, %error, "frame decode error, closing peer connection");
                    break;
                }
            }
        }
    });

    tokio::spawn(run_single_stream_writer(writer, control_rx, data_rx));

    Arc::new(PeerWriterHandle { control_tx, data_tx })
}

async fn run_single_stream_writer(
    mut writer: FramedWrite<WriteHalf<Box<dyn ByteStream>>, FrameCodec>,
    mut control_rx: mpsc::UnboundedReceiver<Frame>,
    mut data_rx: mpsc::UnboundedReceiver<Frame>,
) {
    let mut pending: HashMap<u64, VecDeque<Frame>> = HashMap::new();
    let mut fairness = FairnessQueue::new();

    loop {
        if fairness.is_empty() {
            tokio::select! {
                maybe = control_rx.recv() => match maybe {
                    Some(frame) => {
                        if writer.send(frame).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
                maybe = data_rx.recv() => match maybe {
                    Some(frame) => {
                        let stream_id = frame.header.stream_id;
                        pending.entry(stream_id).or_default().push_back(frame);
                        fairness.mark_pending(stream_id);
                    }
                    None => return,
                },
            }
            continue;
        }

        // Newly arrived control frames always jump the fairness queue.
        while let Ok(frame) = control_rx.try_recv() {
            if writer.send(frame).await.is_err() {
                return;
            }
        }
        while let Ok(frame) = data_rx.try_recv() {
            let stream_id = frame.header.stream_id;
            pending.entry(stream_id).or_default().push_back(frame);
            fairness.mark_pending(stream_id);
        }

        if let Some(stream_id) = fairness.next_turn() {
            if let Some(queue) = pending.get_mut(&stream_id) {
                if let Some(frame) = queue.pop_front() {
                    if writer.send(frame).await.is_err() {
                        return;
                    }
                }
                if queue.is_empty() {
                    pending.remove(&stream_id);
                } else {
                    fairness.mark_pending(stream_id);
                }
            }
        }
    }
}

async fn run_accept_loop(
    connection: Arc<dyn Connection>,
    peer_id: AgentId,
    registry: SubstreamRegistry,
    inbound_tx: mpsc::UnboundedSender<(AgentId, Frame)>,
) {
    loop {
        match connection.accept_stream().await {
            Ok(byte_stream) => {
                spawn_accepted_substream(peer_id, byte_stream, registry.clone(), inbound_tx.clone());
            }
            Err(error) => {
                tracing::debug!(peer = %peer_id, %error, "substream accept loop ending");
                break;
            }
        }
    }
}

async fn run_multiplexed_router(
    connection: Arc<dyn Connection>,
    peer_id: AgentId,
    registry: SubstreamRegistry,
    inbound_tx: mpsc::UnboundedSender<(AgentId, Frame)>,
    mut control_rx: mpsc::UnboundedReceiver<Frame>,
    mut data_rx: mpsc::UnboundedReceiver<Frame>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            maybe = control_rx.recv() => match maybe {
                Some(frame) => frame,
                None => break,
            },
            maybe = data_rx.recv() => match maybe {
                Some(frame) => frame,
                None => break,
            },
        };

        let stream_id = frame.header.stream_id;
        let sender = registry.lock().get(&stream_id).cloned();
        let sender = match sender {
            Some(sender) => sender,
            None => match connection.open_stream().await {
                Ok(byte_stream) => spawn_known_substream(
                    peer_id,
                    stream_id,
                    byte_stream,
                    registry.clone(),
                    inbound_tx.clone(),
                ),
                Err(error) => {
                    tracing::warn!(peer = %peer_id, stream_id, %error, "failed to open substream for outbound frame");
                    continue;
                }
            },
        };

        if sender.send(frame).is_err() {
            registry.lock().remove(&stream_id);
        }
    }
}

fn spawn_known_substream(
    peer_id: AgentId,
    stream_id: u64,
    byte_stream: Box<dyn ByteStream>,
    registry: SubstreamRegistry,
    inbound_tx: mpsc::UnboundedSender<(AgentId, Frame)>,
) -> mpsc::UnboundedSender<Frame> {
    let (tx, rx) = mpsc::unbounded_channel();
    registry.lock().insert(stream_id, tx.clone());
    tokio::spawn(run_substream(
        peer_id,
        Some(stream_id),
        byte_stream,
        rx,
        tx.clone(),
        registry,
        inbound_tx,
    ));
    tx
}

fn spawn_accepted_substream(
    peer_id: AgentId,
    byte_stream: Box<dyn ByteStream>,
    registry: SubstreamRegistry,
    inbound_tx: mpsc::UnboundedSender<(AgentId, Frame)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_substream(peer_id, None, byte_stream, rx, tx, registry, inbound_tx));
}

/// Drives one substream to completion: reads decoded frames off it and
/// forwards them inbound, writes whatever arrives on `rx`. For a
/// remote-initiated substream `known_id` starts `None` and is learned (and
/// registered) from the stream id carried on the first frame read.
async fn run_substream(
    peer_id: AgentId,
    mut known_id: Option<u64>,
    byte_stream: Box<dyn ByteStream>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    self_tx: mpsc::UnboundedSender<Frame>,
    registry: SubstreamRegistry,
    inbound_tx: mpsc::UnboundedSender<(AgentId, Frame)>,
) {
    let (read_half, write_half) = tokio::io::split(byte_stream);
    let mut reader = FramedRead::new(read_half, FrameCodec::new());
    let mut writer = FramedWrite::new(write_half, FrameCodec::new());

    loop {
        tokio::select! {
            incoming = reader.next() => {
                match incoming {
                    Some(Ok(frame)) => {
                        if known_id.is_none() {
                            let id = frame.header.stream_id;
                            registry.lock().insert(id, self_tx.clone());
                            known_id = Some(id);
                        }
                        if inbound_tx.send((peer_id, frame)).is_err() {
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!(peer = %peer_id, %error, "substream decode error");
                        break;
                    }
                    None => break,
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if writer.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(id) = known_id {
        registry.lock().remove(&id);
    }
}
