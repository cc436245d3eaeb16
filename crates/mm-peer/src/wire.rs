//! Conversions between `mm_routing`'s `ipnet::IpNet` route keys and the
//! `RouteEntryWire` shape `ROUTE_ADVERTISE`/`ROUTE_WITHDRAW` carry on the
//! wire (§4.1, §4.4).

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use mm_protocol::payload::{AddressFamily, RouteEntryWire};
use mm_routing::flood::AdvertisedCidr;
use mm_routing::CidrRouteEntry;

pub fn ipnet_to_wire(prefix: IpNet, metric: u16) -> RouteEntryWire {
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

pub fn wire_to_ipnet(entry: &RouteEntryWire) -> Option<IpNet> {
    match entry.family {
        AddressFamily::V4 => {
            if entry.prefix.len() != 4 {
                return None;
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&entry.prefix);
            ipnet::Ipv4Net::new(Ipv4Addr::from(octets), entry.prefix_len)
                .ok()
                .map(IpNet::V4)
        }
        AddressFamily::V6 => {
            if entry.prefix.len() != 16 {
                return None;
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&entry.prefix);
            ipnet::Ipv6Net::new(Ipv6Addr::from(octets), entry.prefix_len)
                .ok()
                .map(IpNet::V6)
        }
    }
}

/// Decode one wire route entry into the shape [`mm_routing::flood::FloodEngine`]
/// consumes. Malformed entries (bad family/length) are dropped by the
/// `filter_map` at the call site rather than failing the whole advertisement.
pub fn wire_to_advertised_cidr(entry: &RouteEntryWire) -> Option<AdvertisedCidr> {
    wire_to_ipnet(entry).map(|prefix| AdvertisedCidr {
        prefix,
        metric: entry.metric,
    })
}

/// Re-encode a just-installed [`CidrRouteEntry`] for reflood. The metric
/// already carries the +1 hop bump `FloodEngine::on_advertise` applied.
pub fn cidr_entry_to_wire(entry: &CidrRouteEntry) -> RouteEntryWire {
    ipnet_to_wire(entry.prefix, entry.metric)
}
