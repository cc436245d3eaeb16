//! Builds the `ROUTE_ADVERTISE` and `NODE_INFO_ADVERTISE` frames an agent
//! floods for its own locally-originated routes (§4.4): the exit CIDRs it
//! serves, if any, and its own presence, which every agent unconditionally
//! advertises.
//!
//! Mirrors `mm_peer::wire`'s `IpNet <-> RouteEntryWire` conversion (that
//! module is private to `mm-peer`, so the one direction this crate needs —
//! encoding, never decoding — is reproduced here rather than exposed).

use ipnet::IpNet;

use mm_protocol::payload::{AddressFamily, NodeInfoAdvertise, RouteAdvertise, RouteEntryWire};
use mm_protocol::AgentId;
use mm_routing::nodeinfo::{NodeInfoBody, PresenceWire};
use mm_routing::ManagementKey;

fn ipnet_to_wire(prefix: IpNet, metric: u16) -> RouteEntryWire {
    match prefix {
        IpNet::V4(net) => RouteEntryWire {
            family: AddressFamily::V4,
            prefix: net.addr().octets().to_vec(),
            prefix_len: net.prefix_len(),
            metric,
        },
        IpNet::V6(net) => RouteEntryWire {
            family: AddressFamily::V6,
            prefix: net.addr().octets().to_vec(),
            prefix_len: net.prefix_len(),
            metric,
        },
    }
}

/// `None` when there is nothing to advertise (no exit routes configured) —
/// the caller skips sending a `ROUTE_ADVERTISE` entirely rather than
/// flooding an empty one.
pub fn build_route_advertise(self_id: AgentId, sequence: u64, exit_routes: &[IpNet]) -> Option<RouteAdvertise> {
    if exit_routes.is_empty() {
        return None;
    }
    Some(RouteAdvertise {
        origin: self_id,
        sequence,
        routes: exit_routes.iter().map(|prefix| ipnet_to_wire(*prefix, 0)).collect(),
        path: Vec::new(),
        seen_by: Vec::new(),
    })
}

/// Every agent unconditionally advertises its own presence (§3), so this
/// always returns a frame to send, sealed under `management_key` when one
/// is configured.
pub fn build_node_info_advertise(
    self_id: AgentId,
    sequence: u64,
    management_key: Option<&ManagementKey>,
) -> NodeInfoAdvertise {
    let body = NodeInfoBody {
        domains: Vec::new(),
        presence: Some(PresenceWire { metric: 0 }),
        forward_keys: Vec::new(),
    };
    let plaintext = body.encode();

    let (encrypted, data) = match management_key {
        Some(key) => {
            let mut rng = rand::rngs::OsRng;
            (true, bytes::Bytes::from(key.seal(&mut rng, &plaintext)))
        }
        None => (false, plaintext),
    };

    NodeInfoAdvertise {
        origin: self_id,
        sequence,
        encrypted,
        data,
        seen_by: Vec::new(),
    }
}
