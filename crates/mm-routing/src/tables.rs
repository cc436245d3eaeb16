use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use ipnet::IpNet;
use mm_protocol::AgentId;
use parking_lot::RwLock;

use crate::types::{AgentPresenceEntry, CidrRouteEntry, DomainRouteEntry, ForwardKeyEntry};

/// CIDR route table with longest-prefix-match lookup (§4.3).
///
/// At most one entry is kept per `(prefix, origin)` pair; a re-advertisement
/// from the same origin with a higher sequence number replaces it in place.
#[derive(Default)]
pub struct CidrTable {
    entries: RwLock<HashMap<(IpNet, AgentId), CidrRouteEntry>>,
}

impl CidrTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry. Returns `false` (no-op) if an existing
    /// entry for the same `(prefix, origin)` has a sequence number that is
    /// not strictly less than `entry.sequence`.
    pub fn upsert(&self, entry: CidrRouteEntry) -> bool {
        let key = (entry.prefix, entry.origin);
        let mut guard = self.entries.write();
        if let Some(existing) = guard.get(&key) {
            if entry.sequence <= existing.sequence {
                return false;
            }
        }
        guard.insert(key, entry);
        true
    }

    pub fn remove(&self, prefix: IpNet, origin: AgentId) -> Option<CidrRouteEntry> {
        self.entries.write().remove(&(prefix, origin))
    }

    /// Remove every entry whose `next_hop` is the given peer, per the
    /// "purge on disconnect" invariant (§4.3, property #7). Returns the
    /// removed entries so callers can decide whether to re-flood a
    /// withdrawal.
    pub fn remove_via_next_hop(&self, next_hop: AgentId) -> Vec<CidrRouteEntry> {
        let mut guard = self.entries.write();
        let doomed: Vec<_> = guard
            .iter()
            .filter(|(_, e)| e.next_hop == next_hop)
            .map(|(k, _)| *k)
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| guard.remove(&k))
            .collect()
    }

    pub fn expire(&self, now: Instant) -> Vec<CidrRouteEntry> {
        let mut guard = self.entries.write();
        let doomed: Vec<_> = guard
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| *k)
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| guard.remove(&k))
            .collect()
    }

    /// Longest-prefix match over all entries containing `addr`, tie-broken
    /// by ascending metric then ascending origin `AgentId` (property #2).
    pub fn lookup(&self, addr: IpAddr) -> Option<CidrRouteEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| e.prefix.contains(&addr))
            .min_by_key(|e| (Reverse(e.prefix.prefix_len()), e.metric, e.origin))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn split_domain(host: &str) -> Option<(&str, &str)> {
    host.split_once('.')
}

/// Domain route table: exact matches plus single-level wildcards
/// (`*.example.com`) (§4.3).
#[derive(Default)]
pub struct DomainTable {
    exact: RwLock<HashMap<(String, AgentId), DomainRouteEntry>>,
    wildcard: RwLock<HashMap<(String, AgentId), DomainRouteEntry>>,
}

impl DomainTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: DomainRouteEntry) -> bool {
        let table = if entry.is_wildcard {
            &self.wildcard
        } else {
            &self.exact
        };
        let key = (entry.pattern.clone(), entry.origin);
        let mut guard = table.write();
        if let Some(existing) = guard.get(&key) {
            if entry.sequence <= existing.sequence {
                return false;
            }
        }
        guard.insert(key, entry);
        true
    }

    pub fn remove_via_next_hop(&self, next_hop: AgentId) -> Vec<DomainRouteEntry> {
        let mut removed = Vec::new();
        for table in [&self.exact, &self.wildcard] {
            let mut guard = table.write();
            let doomed: Vec<_> = guard
                .iter()
                .filter(|(_, e)| e.next_hop == next_hop)
                .map(|(k, _)| k.clone())
                .collect();
            for k in doomed {
                if let Some(e) = guard.remove(&k) {
                    removed.push(e);
                }
            }
        }
        removed
    }

    pub fn expire(&self, now: Instant) -> Vec<DomainRouteEntry> {
        let mut removed = Vec::new();
        for table in [&self.exact, &self.wildcard] {
            let mut guard = table.write();
            let doomed: Vec<_> = guard
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for k in doomed {
                if let Some(e) = guard.remove(&k) {
                    removed.push(e);
                }
            }
        }
        removed
    }

    /// Look up `host` against both an exact match and the derived
    /// single-level wildcard. When both exist, the route with the lower
    /// metric wins; ties favor the exact match.
    pub fn lookup(&self, host: &str) -> Option<DomainRouteEntry> {
        let host = host.to_ascii_lowercase();
        let exact_hit = self
            .exact
            .read()
            .values()
            .filter(|e| e.pattern == host)
            .min_by_key(|e| (e.metric, e.origin))
            .cloned();

        let wildcard_hit = split_domain(&host).and_then(|(_, suffix)| {
            self.wildcard
                .read()
                .values()
                .filter(|e| e.base_domain == suffix)
                .min_by_key(|e| (e.metric, e.origin))
                .cloned()
        });

        match (exact_hit, wildcard_hit) {
            (Some(e), Some(w)) => {
                if w.metric < e.metric {
                    Some(w)
                } else {
                    Some(e)
                }
            }
            (Some(e), None) => Some(e),
            (None, Some(w)) => Some(w),
            (None, None) => None,
        }
    }
}

/// Agent-presence table: which next hop reaches a given agent ID (§4.3).
#[derive(Default)]
pub struct AgentPresenceTable {
    entries: RwLock<HashMap<AgentId, AgentPresenceEntry>>,
}

impl AgentPresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: AgentPresenceEntry) -> bool {
        let mut guard = self.entries.write();
        if let Some(existing) = guard.get(&entry.agent_id) {
            if entry.sequence <= existing.sequence {
                return false;
            }
        }
        guard.insert(entry.agent_id, entry);
        true
    }

    pub fn remove_via_next_hop(&self, next_hop: AgentId) -> Vec<AgentPresenceEntry> {
        let mut guard = self.entries.write();
        let doomed: Vec<_> = guard
            .iter()
            .filter(|(_, e)| e.next_hop == next_hop)
            .map(|(k, _)| *k)
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| guard.remove(&k))
            .collect()
    }

    pub fn expire(&self, now: Instant) -> Vec<AgentPresenceEntry> {
        let mut guard = self.entries.write();
        let doomed: Vec<_> = guard
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| *k)
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| guard.remove(&k))
            .collect()
    }

    pub fn lookup(&self, agent_id: AgentId) -> Option<AgentPresenceEntry> {
        self.entries.read().get(&agent_id).cloned()
    }
}

/// Forward-key table for reverse tunnels, keyed by opaque key string
/// (§4.3).
#[derive(Default)]
pub struct ForwardKeyTable {
    entries: RwLock<HashMap<String, ForwardKeyEntry>>,
}

impl ForwardKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: ForwardKeyEntry) -> bool {
        let mut guard = self.entries.write();
        if let Some(existing) = guard.get(&entry.key) {
            if entry.sequence <= existing.sequence {
                return false;
            }
        }
        guard.insert(entry.key.clone(), entry);
        true
    }

    pub fn remove_via_next_hop(&self, next_hop: AgentId) -> Vec<ForwardKeyEntry> {
        let mut guard = self.entries.write();
        let doomed: Vec<_> = guard
            .iter()
            .filter(|(_, e)| e.next_hop == next_hop)
            .map(|(k, _)| k.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| guard.remove(&k))
            .collect()
    }

    pub fn expire(&self, now: Instant) -> Vec<ForwardKeyEntry> {
        let mut guard = self.entries.write();
        let doomed: Vec<_> = guard
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| guard.remove(&k))
            .collect()
    }

    pub fn lookup(&self, key: &str) -> Option<ForwardKeyEntry> {
        self.entries.read().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn agent(byte: u8) -> AgentId {
        AgentId::from_bytes([byte; 16])
    }

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    fn cidr_entry(prefix: &str, origin: AgentId, metric: u16, sequence: u64) -> CidrRouteEntry {
        CidrRouteEntry {
            prefix: prefix.parse().unwrap(),
            origin,
            next_hop: origin,
            path: vec![origin],
            metric,
            sequence,
            expires_at: far_future(),
        }
    }

    #[test]
    fn longest_prefix_match_picks_most_specific() {
        let table = CidrTable::new();
        let a = agent(1);
        let b = agent(2);
        let c = agent(3);

        table.upsert(cidr_entry("10.0.0.0/8", a, 1, 1));
        table.upsert(cidr_entry("10.5.0.0/16", b, 1, 1));
        table.upsert(cidr_entry("10.5.3.0/24", c, 1, 1));

        assert_eq!(
            table.lookup("10.5.3.100".parse().unwrap()).unwrap().origin,
            c
        );
        assert_eq!(
            table.lookup("10.5.4.1".parse().unwrap()).unwrap().origin,
            b
        );
        assert_eq!(
            table.lookup("10.6.0.1".parse().unwrap()).unwrap().origin,
            a
        );
        assert!(table.lookup("11.0.0.1".parse().unwrap()).is_none());
    }

    #[test]
    fn equal_prefix_length_ties_broken_by_metric_then_origin() {
        let table = CidrTable::new();
        let a = agent(1);
        let b = agent(2);

        table.upsert(cidr_entry("10.0.0.0/8", a, 5, 1));
        table.upsert(cidr_entry("10.0.0.0/8", b, 2, 1));

        assert_eq!(
            table.lookup("10.1.2.3".parse().unwrap()).unwrap().origin,
            b
        );
    }

    #[test]
    fn stale_sequence_does_not_replace_entry() {
        let table = CidrTable::new();
        let a = agent(1);
        assert!(table.upsert(cidr_entry("10.0.0.0/8", a, 1, 5)));
        assert!(!table.upsert(cidr_entry("10.0.0.0/8", a, 9, 3)));
        assert_eq!(table.lookup("10.0.0.1".parse().unwrap()).unwrap().metric, 1);
    }

    #[test]
    fn disconnect_purges_entries_via_next_hop() {
        let table = CidrTable::new();
        let a = agent(1);
        let mut e = cidr_entry("10.0.0.0/8", a, 1, 1);
        e.next_hop = a;
        table.upsert(e);
        assert_eq!(table.remove_via_next_hop(a).len(), 1);
        assert!(table.is_empty());
    }

    fn domain_entry(pattern: &str, origin: AgentId, metric: u16, sequence: u64) -> DomainRouteEntry {
        let is_wildcard = pattern.starts_with("*.");
        let base_domain = if is_wildcard {
            pattern.trim_start_matches("*.").to_string()
        } else {
            String::new()
        };
        DomainRouteEntry {
            pattern: pattern.to_string(),
            is_wildcard,
            base_domain,
            origin,
            next_hop: origin,
            path: vec![origin],
            metric,
            sequence,
            expires_at: far_future(),
        }
    }

    #[test]
    fn domain_wildcard_matches_subdomain() {
        let table = DomainTable::new();
        let a = agent(1);
        table.upsert(domain_entry("*.example.com", a, 1, 1));

        assert_eq!(table.lookup("foo.example.com").unwrap().origin, a);
        assert_eq!(table.lookup("bar.example.com").unwrap().origin, a);
        assert!(table.lookup("example.com").is_none());
        assert!(table.lookup("foo.example.org").is_none());
    }

    #[test]
    fn exact_match_preferred_on_metric_tie() {
        let table = DomainTable::new();
        let a = agent(1);
        let b = agent(2);
        table.upsert(domain_entry("*.example.com", a, 1, 1));
        table.upsert(domain_entry("foo.example.com", b, 1, 1));

        assert_eq!(table.lookup("foo.example.com").unwrap().origin, b);
    }

    #[test]
    fn lower_metric_route_wins_between_exact_and_wildcard() {
        let table = DomainTable::new();
        let a = agent(1);
        let b = agent(2);
        table.upsert(domain_entry("*.example.com", a, 1, 1));
        table.upsert(domain_entry("foo.example.com", b, 9, 1));

        assert_eq!(table.lookup("foo.example.com").unwrap().origin, a);
    }
}
