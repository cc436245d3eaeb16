//! The shared routing/stream state one agent process hands to every
//! [`crate::connection::PeerConnection`] it runs. Everything here is `Arc`
//! already, so cloning this struct is cheap and each peer task gets its own
//! copy to close over.

use std::sync::Arc;
use std::time::Duration;

use mm_protocol::payload::Address;
use mm_routing::flood::FloodState;
use mm_routing::{AgentPresenceTable, CidrTable, DomainTable, ForwardKeyTable, ManagementKey};
use mm_stream::StreamManager;

use crate::registry::PeerRegistry;

#[derive(Clone)]
pub struct RoutingContext {
    pub cidr: Arc<CidrTable>,
    pub domains: Arc<DomainTable>,
    pub presence: Arc<AgentPresenceTable>,
    pub forward_keys: Arc<ForwardKeyTable>,
    pub flood_state: Arc<FloodState>,
    pub management_key: Option<Arc<ManagementKey>>,
    pub route_ttl: Duration,
    pub registry: Arc<PeerRegistry>,
    pub streams: Arc<StreamManager>,
}

impl RoutingContext {
    /// C9's "asks C3 for a next-hop" (§2 data flow): turn a destination
    /// address into the hop path `mm_stream::StreamManager::open` expects —
    /// `path[0]` is the next directly-connected peer to hand the
    /// `STREAM_OPEN` to, `path[1..]` rides along as `remaining_path`.
    ///
    /// A `CidrRouteEntry`/`DomainRouteEntry`'s `path` field is already
    /// shaped this way (`mm_routing::flood` builds it as
    /// `[next_hop] ++ rest_of_path_to_origin`), so this is a straight
    /// lookup-and-clone with no reshaping.
    pub fn resolve_path(&self, addr: &Address) -> Option<Vec<mm_protocol::AgentId>> {
        match addr {
            Address::V4(ip) => self.cidr.lookup(std::net::IpAddr::V4(*ip)).map(|e| e.path),
            Address::V6(ip) => self.cidr.lookup(std::net::IpAddr::V6(*ip)).map(|e| e.path),
            Address::Domain(host) => self.domains.lookup(host).map(|e| e.path),
        }
    }
}
