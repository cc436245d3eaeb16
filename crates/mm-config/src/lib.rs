//! Configuration loading, `${VAR}` environment substitution, and persisted
//! agent identity (§6).

mod config;
mod env;
mod error;
mod identity;

pub use config::{
    AgentSectionConfig, Config, ConnectionsConfig, DnsConfig, ExitConfig, LimitsConfig,
    ListenerConfig, PeerConfig, ReconnectConfig, RoutingConfig, Socks5AuthConfig, Socks5Config,
    TlsConfig, TransportKind, load_from_path, load_from_str,
};
pub use error::ConfigError;
pub use identity::{Identity, load_or_create};
