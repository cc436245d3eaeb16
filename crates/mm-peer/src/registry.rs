//! Tracks the set of currently connected peers (§4.6), so the flood engine
//! knows which agents to reflood to (`FloodEngine::known_peers`) and the
//! reader loop can reach any peer's writer to relay a control frame.

use std::collections::HashMap;
use std::sync::Arc;

use mm_protocol::{AgentId, Frame};
use parking_lot::RwLock;

use crate::writer::PeerWriterHandle;

#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<AgentId, Arc<PeerWriterHandle>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        PeerRegistry::default()
    }

    pub fn insert(&self, id: AgentId, handle: Arc<PeerWriterHandle>) {
        self.peers.write().insert(id, handle);
    }

    pub fn remove(&self, id: AgentId) {
        self.peers.write().remove(&id);
    }

    pub fn get(&self, id: AgentId) -> Option<Arc<PeerWriterHandle>> {
        self.peers.read().get(&id).cloned()
    }

    /// Snapshot of currently connected peers, for `FloodEngine::known_peers`.
    pub fn known_peer_ids(&self) -> Vec<AgentId> {
        self.peers.read().keys().copied().collect()
    }

    /// Best-effort control-frame send; silently drops if `id` isn't
    /// connected (it may have disconnected mid-reflood).
    pub async fn send_control(&self, id: AgentId, frame: Frame) {
        let handle = self.peers.read().get(&id).cloned();
        if let Some(handle) = handle {
            let _ = handle.send_control_frame(frame).await;
        }
    }
}
