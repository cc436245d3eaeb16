//! The loop-prevented flood/gossip protocol (§4.4): route advertisements
//! carry an origin, a monotonic per-origin sequence number, and a
//! `seen_by` path. An agent applies an advertisement only if it is fresher
//! than the last one seen from that origin, then reflloods it to every
//! peer not already in `seen_by`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mm_protocol::AgentId;
use parking_lot::RwLock;

use crate::types::CidrRouteEntry;

/// A bundle of CIDR routes flooded together under one sequence number.
///
/// `ROUTE_ADVERTISE`/`ROUTE_WITHDRAW` wire frames only carry CIDR-shaped
/// route lists; domain, agent-presence, and forward-key advertisements ride
/// inside `NODE_INFO_ADVERTISE`'s opaque payload instead and are decoded by
/// the caller before reaching this engine.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub origin: AgentId,
    pub sequence: u64,
    pub routes: Vec<AdvertisedCidr>,
    pub path: Vec<AgentId>,
    pub seen_by: Vec<AgentId>,
}

#[derive(Debug, Clone, Copy)]
pub struct AdvertisedCidr {
    pub prefix: ipnet::IpNet,
    pub metric: u16,
}

/// Tracks the last-accepted sequence number per origin, for freshness
/// checks independent of which route table the routes end up in.
#[derive(Default)]
pub struct FloodState {
    last_seq: RwLock<HashMap<AgentId, u64>>,
}

impl FloodState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `sequence` is newer than anything previously
    /// recorded for `origin`, recording it as the new high-water mark.
    fn accept(&self, origin: AgentId, sequence: u64) -> bool {
        let mut guard = self.last_seq.write();
        match guard.get(&origin) {
            Some(&last) if sequence <= last => false,
            _ => {
                guard.insert(origin, sequence);
                true
            }
        }
    }

    pub fn last_sequence(&self, origin: AgentId) -> Option<u64> {
        self.last_seq.read().get(&origin).copied()
    }
}

/// Outcome of applying an incoming advertisement: which table entries were
/// installed and which peers to reflood to.
pub struct ApplyResult {
    pub installed: Vec<CidrRouteEntry>,
    pub reflood_to: Vec<AgentId>,
}

/// Drives the six-step advertise/withdraw algorithm over a [`FloodState`]
/// and a [`crate::CidrTable`]. Holds no knowledge of peer connections: the
/// caller is responsible for actually sending the reflood.
pub struct FloodEngine<'a> {
    pub self_id: AgentId,
    pub state: &'a FloodState,
    pub table: &'a crate::CidrTable,
    pub ttl: Duration,
    pub known_peers: Vec<AgentId>,
}

impl<'a> FloodEngine<'a> {
    /// The freshness/loop-prevention half of steps 1-4 and 6 (§4.4), shared
    /// by CIDR `ROUTE_ADVERTISE` processing and `NODE_INFO_ADVERTISE`
    /// processing (`mm_routing::nodeinfo`): both envelopes carry the same
    /// origin/sequence/path/seen_by shape, they just disagree on what the
    /// payload installs. Returns `None` when the advertisement should be
    /// dropped (self-originated, already seen, or stale); otherwise returns
    /// the extended hop path and the set of peers to reflood to.
    pub fn check_freshness(
        &self,
        from_peer: AgentId,
        origin: AgentId,
        sequence: u64,
        path: &[AgentId],
        seen_by: &[AgentId],
    ) -> Option<(Vec<AgentId>, Vec<AgentId>)> {
        if origin == self.self_id {
            return None;
        }
        if seen_by.contains(&self.self_id) {
            return None;
        }
        if !self.state.accept(origin, sequence) {
            return None;
        }

        let mut new_path = vec![from_peer];
        new_path.extend(path.iter().copied());

        let mut new_seen_by = seen_by.to_vec();
        new_seen_by.push(self.self_id);
        let reflood_to = self
            .known_peers
            .iter()
            .copied()
            .filter(|p| *p != from_peer && !new_seen_by.contains(p))
            .collect();

        Some((new_path, reflood_to))
    }

    /// Apply an incoming `ROUTE_ADVERTISE`, received from `from_peer`.
    ///
    /// Steps (§4.4):
    /// 1. Drop if `origin == self_id` (we don't process our own routes).
    /// 2. Drop if `self_id` already appears in `seen_by` (loop prevention).
    /// 3. Drop if `sequence` is not newer than the last seen from `origin`.
    /// 4. Record the new sequence as the high-water mark for `origin`.
    /// 5. Install each route with `next_hop = from_peer`,
    ///    `path = [from_peer] ++ advertisement.path`, `metric + 1`, and a
    ///    fresh expiry.
    /// 6. Append `self_id` to `seen_by` and reflood to every known peer not
    ///    already in the (updated) `seen_by` list, other than `from_peer`.
    pub fn on_advertise(&self, from_peer: AgentId, advertisement: Advertisement) -> ApplyResult {
        if advertisement.origin == self.self_id {
            return ApplyResult {
                installed: Vec::new(),
                reflood_to: Vec::new(),
            };
        }
        if advertisement.seen_by.contains(&self.self_id) {
            return ApplyResult {
                installed: Vec::new(),
                reflood_to: Vec::new(),
            };
        }
        if !self.state.accept(advertisement.origin, advertisement.sequence) {
            return ApplyResult {
                installed: Vec::new(),
                reflood_to: Vec::new(),
            };
        }

        let mut path = vec![from_peer];
        path.extend(advertisement.path.iter().copied());
        let expires_at = Instant::now() + self.ttl;

        let mut installed = Vec::new();
        for route in &advertisement.routes {
            let entry = CidrRouteEntry {
                prefix: route.prefix,
                origin: advertisement.origin,
                next_hop: from_peer,
                path: path.clone(),
                metric: route.metric.saturating_add(1),
                sequence: advertisement.sequence,
                expires_at,
            };
            if self.table.upsert(entry.clone()) {
                installed.push(entry);
            }
        }

        let mut seen_by = advertisement.seen_by;
        seen_by.push(self.self_id);
        let reflood_to = self
            .known_peers
            .iter()
            .copied()
            .filter(|p| *p != from_peer && !seen_by.contains(p))
            .collect();

        ApplyResult {
            installed,
            reflood_to,
        }
    }

    /// Apply an incoming `ROUTE_WITHDRAW`. Same freshness and loop checks as
    /// advertise, but removes matching `(prefix, origin)` entries instead of
    /// installing them.
    pub fn on_withdraw(&self, from_peer: AgentId, withdrawal: Advertisement) -> ApplyResult {
        if withdrawal.origin == self.self_id || withdrawal.seen_by.contains(&self.self_id) {
            return ApplyResult {
                installed: Vec::new(),
                reflood_to: Vec::new(),
            };
        }
        if !self.state.accept(withdrawal.origin, withdrawal.sequence) {
            return ApplyResult {
                installed: Vec::new(),
                reflood_to: Vec::new(),
            };
        }

        for route in &withdrawal.routes {
            self.table.remove(route.prefix, withdrawal.origin);
        }

        let mut seen_by = withdrawal.seen_by;
        seen_by.push(self.self_id);
        let reflood_to = self
            .known_peers
            .iter()
            .copied()
            .filter(|p| *p != from_peer && !seen_by.contains(p))
            .collect();

        ApplyResult {
            installed: Vec::new(),
            reflood_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CidrTable;

    fn agent(byte: u8) -> AgentId {
        AgentId::from_bytes([byte; 16])
    }

    fn route(prefix: &str, metric: u16) -> AdvertisedCidr {
        AdvertisedCidr {
            prefix: prefix.parse().unwrap(),
            metric,
        }
    }

    #[test]
    fn newer_sequence_supersedes_older() {
        let state = FloodState::new();
        let table = CidrTable::new();
        let self_id = agent(0);
        let origin = agent(9);
        let from_peer = agent(1);

        let engine = FloodEngine {
            self_id,
            state: &state,
            table: &table,
            ttl: Duration::from_secs(60),
            known_peers: vec![from_peer],
        };

        let first = Advertisement {
            origin,
            sequence: 1,
            routes: vec![route("10.0.0.0/8", 0)],
            path: vec![],
            seen_by: vec![],
        };
        let result = engine.on_advertise(from_peer, first);
        assert_eq!(result.installed.len(), 1);

        let stale = Advertisement {
            origin,
            sequence: 1,
            routes: vec![route("10.0.0.0/8", 0)],
            path: vec![],
            seen_by: vec![],
        };
        let result = engine.on_advertise(from_peer, stale);
        assert!(result.installed.is_empty(), "stale sequence must be dropped");

        let fresher = Advertisement {
            origin,
            sequence: 2,
            routes: vec![route("10.0.0.0/8", 3)],
            path: vec![],
            seen_by: vec![],
        };
        let result = engine.on_advertise(from_peer, fresher);
        assert_eq!(result.installed.len(), 1);
        assert_eq!(result.installed[0].metric, 4);
    }

    #[test]
    fn ring_of_four_agents_does_not_loop() {
        // Agents 1-2-3-4-1 in a ring; self is agent 1, advertisement
        // originates from agent 3 and arrives at agent 1 via agent 2 having
        // already traversed agent 4, so seen_by = [4, 3] before agent 1
        // processes it (agent 3 is the origin, so it is not in seen_by).
        let self_id = agent(1);
        let peer2 = agent(2);
        let peer4 = agent(4);
        let origin = agent(3);

        let state = FloodState::new();
        let table = CidrTable::new();
        let engine = FloodEngine {
            self_id,
            state: &state,
            table: &table,
            ttl: Duration::from_secs(60),
            known_peers: vec![peer2, peer4],
        };

        let advertisement = Advertisement {
            origin,
            sequence: 1,
            routes: vec![route("10.0.0.0/8", 0)],
            path: vec![peer4],
            seen_by: vec![peer4],
        };
        let result = engine.on_advertise(peer2, advertisement);
        // Reflood must go back out to peer4 only if peer4 isn't already in
        // seen_by — it is, so reflood_to should be empty (peer2 is the
        // sender and excluded; peer4 already saw it).
        assert!(result.reflood_to.is_empty());

        // A second copy of the same advertisement arriving via a different
        // path must be dropped outright because self_id already would be in
        // seen_by after the first application... but since we never
        // resubmit with self in seen_by here, instead verify the duplicate
        // (same sequence) from another peer is dropped for staleness.
        let duplicate = Advertisement {
            origin,
            sequence: 1,
            routes: vec![route("10.0.0.0/8", 0)],
            path: vec![peer2],
            seen_by: vec![peer2],
        };
        let result = engine.on_advertise(peer4, duplicate);
        assert!(result.installed.is_empty());
    }

    #[test]
    fn self_originated_advertisement_is_ignored() {
        let self_id = agent(1);
        let state = FloodState::new();
        let table = CidrTable::new();
        let engine = FloodEngine {
            self_id,
            state: &state,
            table: &table,
            ttl: Duration::from_secs(60),
            known_peers: vec![agent(2)],
        };

        let advertisement = Advertisement {
            origin: self_id,
            sequence: 1,
            routes: vec![route("10.0.0.0/8", 0)],
            path: vec![],
            seen_by: vec![],
        };
        let result = engine.on_advertise(agent(2), advertisement);
        assert!(result.installed.is_empty());
        assert!(result.reflood_to.is_empty());
    }

    #[test]
    fn withdraw_removes_installed_entry() {
        let self_id = agent(1);
        let origin = agent(9);
        let from_peer = agent(2);
        let state = FloodState::new();
        let table = CidrTable::new();
        let engine = FloodEngine {
            self_id,
            state: &state,
            table: &table,
            ttl: Duration::from_secs(60),
            known_peers: vec![from_peer],
        };

        engine.on_advertise(
            from_peer,
            Advertisement {
                origin,
                sequence: 1,
                routes: vec![route("10.0.0.0/8", 0)],
                path: vec![],
                seen_by: vec![],
            },
        );
        assert_eq!(table.len(), 1);

        engine.on_withdraw(
            from_peer,
            Advertisement {
                origin,
                sequence: 2,
                routes: vec![route("10.0.0.0/8", 0)],
                path: vec![],
                seen_by: vec![],
            },
        );
        assert!(table.is_empty());
    }
}
