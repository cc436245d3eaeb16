//! Route tables (§4.3) and the loop-prevented flood protocol (§4.4).
//!
//! This crate is pure data structures behind locks — no I/O, no knowledge of
//! peer connections. `mm-peer`'s reader loop translates wire frames into
//! calls here; callers of [`flood::FloodEngine`] are told which peers to
//! reflood to and hand the actual sends off to `mm-peer`.

mod management_key;
mod tables;
pub mod flood;
pub mod nodeinfo;
pub mod types;

pub use management_key::{ManagementKey, ManagementKeyError};
pub use tables::{AgentPresenceTable, CidrTable, DomainTable, ForwardKeyTable};
pub use types::{AgentPresenceEntry, CidrRouteEntry, DomainRouteEntry, ForwardKeyEntry};

/// Default TTL for route entries before they expire (§4.3, §5).
pub const DEFAULT_ROUTE_TTL: std::time::Duration = std::time::Duration::from_secs(5 * 60);
