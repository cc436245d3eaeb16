use parking_lot::RwLock;
use std::collections::HashMap;

use mm_protocol::AgentId;

/// One endpoint of a transit splice: which peer and local stream ID the
/// other half of a forwarded stream lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub peer: AgentId,
    pub local_id: u64,
}

impl StreamKey {
    pub fn new(peer: AgentId, local_id: u64) -> Self {
        StreamKey { peer, local_id }
    }
}

/// Maps a transit stream's inbound key to its outbound mate and back.
///
/// One entry's lifetime is exactly one stream's lifetime (§5): inserted when
/// a transit hop opens the next leg, removed when the stream closes on
/// either side. A transit hop only ever looks up the mate to forward
/// `STREAM_DATA`/`STREAM_CLOSE`/`STREAM_RESET` verbatim; it never decrypts.
#[derive(Default)]
pub struct ForwardTable {
    mates: RwLock<HashMap<StreamKey, StreamKey>>,
}

impl ForwardTable {
    pub fn new() -> Self {
        ForwardTable::default()
    }

    /// Link two stream keys as mates of one transit splice (both directions).
    pub fn link(&self, a: StreamKey, b: StreamKey) {
        let mut mates = self.mates.write();
        mates.insert(a, b);
        mates.insert(b, a);
    }

    pub fn mate_of(&self, key: StreamKey) -> Option<StreamKey> {
        self.mates.read().get(&key).copied()
    }

    /// Remove both halves of the link naming `key`, if any.
    pub fn unlink(&self, key: StreamKey) {
        let mut mates = self.mates.write();
        if let Some(other) = mates.remove(&key) {
            mates.remove(&other);
        }
    }

    /// Remove every link that touches `peer` — used when a peer connection
    /// is torn down so transit streams routed through it are cleaned up.
    pub fn remove_peer(&self, peer: AgentId) -> Vec<StreamKey> {
        let mut mates = self.mates.write();
        let stale: Vec<StreamKey> = mates.keys().filter(|k| k.peer == peer).copied().collect();
        let mut affected_mates = Vec::new();
        for key in &stale {
            if let Some(mate) = mates.remove(key) {
                if mate.peer != peer {
                    affected_mates.push(mate);
                }
            }
        }
        for mate in &affected_mates {
            mates.remove(mate);
        }
        affected_mates
    }

    pub fn len(&self) -> usize {
        self.mates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aid(b: u8) -> AgentId {
        AgentId::from_bytes([b; 16])
    }

    #[test]
    fn link_is_bidirectional_and_unlink_removes_both_halves() {
        let table = ForwardTable::new();
        let a = StreamKey::new(aid(1), 3);
        let b = StreamKey::new(aid(2), 4);
        table.link(a, b);
        assert_eq!(table.mate_of(a), Some(b));
        assert_eq!(table.mate_of(b), Some(a));

        table.unlink(a);
        assert_eq!(table.mate_of(a), None);
        assert_eq!(table.mate_of(b), None);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_peer_tears_down_every_link_through_it() {
        let table = ForwardTable::new();
        let a = StreamKey::new(aid(1), 1);
        let b = StreamKey::new(aid(2), 2);
        let c = StreamKey::new(aid(3), 5);
        table.link(a, b);
        table.link(c, StreamKey::new(aid(1), 7));

        let affected = table.remove_peer(aid(1));
        assert!(affected.contains(&b));
        assert!(affected.contains(&c));
        assert!(table.is_empty());
    }
}
