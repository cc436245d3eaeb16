use std::time::Instant;

use ipnet::IpNet;
use mm_protocol::AgentId;

/// A CIDR route (§3 `RouteEntry`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRouteEntry {
    pub prefix: IpNet,
    pub origin: AgentId,
    pub next_hop: AgentId,
    pub path: Vec<AgentId>,
    pub metric: u16,
    pub sequence: u64,
    pub expires_at: Instant,
}

/// A domain route, either an exact match or a single-level wildcard
/// (§3 `DomainRoute`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRouteEntry {
    /// Full pattern as advertised, e.g. `"foo.example.com"` or
    /// `"*.example.com"`.
    pub pattern: String,
    pub is_wildcard: bool,
    /// For wildcard routes, the suffix after `*.` (lowercased); empty for
    /// exact routes.
    pub base_domain: String,
    pub origin: AgentId,
    pub next_hop: AgentId,
    pub path: Vec<AgentId>,
    pub metric: u16,
    pub sequence: u64,
    pub expires_at: Instant,
}

/// An agent's reachability entry (§3 `AgentPresenceRoute`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPresenceEntry {
    pub agent_id: AgentId,
    pub next_hop: AgentId,
    pub path: Vec<AgentId>,
    pub metric: u16,
    pub sequence: u64,
    pub expires_at: Instant,
}

/// A reverse-tunnel forwarding route (§3 `ForwardKeyRoute`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardKeyEntry {
    pub key: String,
    pub origin: AgentId,
    pub next_hop: AgentId,
    pub path: Vec<AgentId>,
    pub metric: u16,
    pub sequence: u64,
    pub target_host_port: String,
    pub expires_at: Instant,
}
