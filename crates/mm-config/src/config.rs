//! Configuration value types consumed by the `agent` binary (§6).
//!
//! Mirrors the teacher's two-tier shape (`forwarder::config`): a `Raw*`
//! tree of `Option`-wrapped fields deserialized straight from TOML, then
//! validated and defaulted into the plain `Config` tree the rest of the
//! crate works with. The *loader* (CLI/wizard that decides which file to
//! read) is an external collaborator per spec §1 — this crate only turns
//! already-read TOML text into a validated value.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use mm_protocol::AgentId;

use crate::env::expand_from_process_env;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Quic,
    H2,
    Ws,
}

impl TransportKind {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "quic" => Ok(TransportKind::Quic),
            "h2" => Ok(TransportKind::H2),
            "ws" => Ok(TransportKind::Ws),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown transport '{other}', expected quic|h2|ws"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub cert_pem: Option<String>,
    pub key_pem: Option<String>,
    pub client_ca: Option<String>,
    pub ca_file: Option<String>,
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub transport: TransportKind,
    pub address: String,
    pub path: Option<String>,
    pub tls: TlsConfig,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub expected_agent_id: Option<AgentId>,
    pub transport: TransportKind,
    pub address: String,
    pub tls: TlsConfig,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentSectionConfig {
    pub id: Option<AgentId>,
    pub display_name: Option<String>,
    pub data_dir: PathBuf,
    pub private_key: Option<[u8; 32]>,
}

#[derive(Debug, Clone, Copy)]
pub struct RoutingConfig {
    pub advertise_interval: Duration,
    pub route_ttl: Duration,
    pub max_hops: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            advertise_interval: Duration::from_secs(2 * 60),
            route_ttl: Duration::from_secs(5 * 60),
            max_hops: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    /// `None` = infinite retries (§4.6 default).
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.20,
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionsConfig {
    pub idle_threshold: Duration,
    pub timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        ConnectionsConfig {
            idle_threshold: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(90),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimitsConfig {
    pub max_streams_per_peer: usize,
    pub max_streams_total: usize,
    pub max_pending_opens: usize,
    pub stream_open_timeout: Duration,
    pub buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_streams_per_peer: 1_000,
            max_streams_total: 10_000,
            max_pending_opens: 100,
            stream_open_timeout: Duration::from_secs(30),
            buffer_size: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub servers: Vec<String>,
    pub timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            servers: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExitConfig {
    pub enabled: bool,
    pub routes: Vec<ipnet::IpNet>,
    pub dns: DnsConfig,
}

impl Default for ExitConfig {
    fn default() -> Self {
        ExitConfig {
            enabled: false,
            routes: Vec::new(),
            dns: DnsConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Socks5AuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Socks5Config {
    pub enabled: bool,
    pub address: String,
    pub auth: Option<Socks5AuthConfig>,
}

impl Default for Socks5Config {
    fn default() -> Self {
        Socks5Config {
            enabled: false,
            address: "127.0.0.1:1080".to_owned(),
            auth: None,
        }
    }
}

/// The fully validated, defaulted configuration tree (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentSectionConfig,
    pub listeners: Vec<ListenerConfig>,
    pub peers: Vec<PeerConfig>,
    pub routing: RoutingConfig,
    pub connections: ConnectionsConfig,
    pub limits: LimitsConfig,
    pub exit: ExitConfig,
    pub socks5: Socks5Config,
}

// ---------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    agent: Option<RawAgent>,
    listeners: Option<Vec<RawListener>>,
    peers: Option<Vec<RawPeer>>,
    routing: Option<RawRouting>,
    connections: Option<RawConnections>,
    limits: Option<RawLimits>,
    exit: Option<RawExit>,
    socks5: Option<RawSocks5>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAgent {
    id: Option<String>,
    display_name: Option<String>,
    data_dir: Option<String>,
    private_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawTls {
    cert_file: Option<String>,
    key_file: Option<String>,
    cert_pem: Option<String>,
    key_pem: Option<String>,
    client_ca: Option<String>,
    ca: Option<String>,
    strict: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawListener {
    transport: String,
    address: String,
    path: Option<String>,
    tls: Option<RawTls>,
}

#[derive(Debug, Deserialize)]
struct RawPeer {
    expected_agent_id: Option<String>,
    transport: String,
    address: String,
    tls: Option<RawTls>,
    proxy: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawRouting {
    advertise_interval_secs: Option<u64>,
    route_ttl_secs: Option<u64>,
    max_hops: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct RawReconnect {
    initial_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConnections {
    idle_threshold_secs: Option<u64>,
    timeout_secs: Option<u64>,
    reconnect: Option<RawReconnect>,
}

#[derive(Debug, Deserialize, Default)]
struct RawLimits {
    max_streams_per_peer: Option<usize>,
    max_streams_total: Option<usize>,
    max_pending_opens: Option<usize>,
    stream_open_timeout_secs: Option<u64>,
    buffer_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDns {
    servers: Option<Vec<String>>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawExit {
    enabled: Option<bool>,
    routes: Option<Vec<String>>,
    dns: Option<RawDns>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSocks5Auth {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSocks5 {
    enabled: Option<bool>,
    address: Option<String>,
    auth: Option<RawSocks5Auth>,
}

fn build_tls(raw: Option<RawTls>) -> TlsConfig {
    let raw = raw.unwrap_or_default();
    TlsConfig {
        cert_file: raw.cert_file,
        key_file: raw.key_file,
        cert_pem: raw.cert_pem,
        key_pem: raw.key_pem,
        client_ca: raw.client_ca,
        ca_file: raw.ca,
        strict: raw.strict.unwrap_or(false),
    }
}

fn parse_private_key(hex_str: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| ConfigError::InvalidValue(format!("agent.private_key is not valid hex: {e}")))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        ConfigError::InvalidValue(format!(
            "agent.private_key must decode to 32 bytes, got {}",
            v.len()
        ))
    })
}

/// Parse and validate configuration from already-read TOML text, after
/// `${VAR}` substitution. This is the core entry point `mm-config` offers;
/// loading from a file path is a thin wrapper the `agent` binary uses.
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let expanded = expand_from_process_env(toml_str);
    let raw: RawConfig = toml::from_str(&expanded).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let raw_agent = raw.agent.unwrap_or_default();
    let id = raw_agent
        .id
        .map(|s| {
            s.parse::<AgentId>()
                .map_err(|_| ConfigError::InvalidValue("agent.id must be 32 hex characters".to_owned()))
        })
        .transpose()?;
    let data_dir = raw_agent
        .data_dir
        .map(PathBuf::from)
        .ok_or_else(|| ConfigError::MissingField("agent.data_dir".to_owned()))?;
    let private_key = raw_agent.private_key.map(|s| parse_private_key(&s)).transpose()?;

    let agent = AgentSectionConfig {
        id,
        display_name: raw_agent.display_name,
        data_dir,
        private_key,
    };

    let mut listeners = Vec::new();
    for (i, l) in raw.listeners.unwrap_or_default().into_iter().enumerate() {
        let transport = TransportKind::parse(&l.transport).map_err(|_| {
            ConfigError::InvalidValue(format!("listeners[{i}].transport '{}' is invalid", l.transport))
        })?;
        listeners.push(ListenerConfig {
            transport,
            address: l.address,
            path: l.path,
            tls: build_tls(l.tls),
        });
    }

    let mut peers = Vec::new();
    for (i, p) in raw.peers.unwrap_or_default().into_iter().enumerate() {
        let transport = TransportKind::parse(&p.transport).map_err(|_| {
            ConfigError::InvalidValue(format!("peers[{i}].transport '{}' is invalid", p.transport))
        })?;
        let expected_agent_id = p
            .expected_agent_id
            .map(|s| {
                s.parse::<AgentId>().map_err(|_| {
                    ConfigError::InvalidValue(format!("peers[{i}].expected_agent_id is not valid"))
                })
            })
            .transpose()?;
        peers.push(PeerConfig {
            expected_agent_id,
            transport,
            address: p.address,
            tls: build_tls(p.tls),
            proxy: p.proxy,
        });
    }

    let raw_routing = raw.routing.unwrap_or_default();
    let defaults = RoutingConfig::default();
    let routing = RoutingConfig {
        advertise_interval: raw_routing
            .advertise_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.advertise_interval),
        route_ttl: raw_routing
            .route_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.route_ttl),
        max_hops: raw_routing.max_hops.unwrap_or(defaults.max_hops),
    };

    let raw_connections = raw.connections.unwrap_or_default();
    let conn_defaults = ConnectionsConfig::default();
    let raw_reconnect = raw_connections.reconnect.unwrap_or_default();
    let reconnect_defaults = ReconnectConfig::default();
    let reconnect = ReconnectConfig {
        initial_delay: raw_reconnect
            .initial_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(reconnect_defaults.initial_delay),
        max_delay: raw_reconnect
            .max_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(reconnect_defaults.max_delay),
        multiplier: raw_reconnect.multiplier.unwrap_or(reconnect_defaults.multiplier),
        jitter: raw_reconnect.jitter.unwrap_or(reconnect_defaults.jitter),
        max_retries: raw_reconnect.max_retries,
    };
    let connections = ConnectionsConfig {
        idle_threshold: raw_connections
            .idle_threshold_secs
            .map(Duration::from_secs)
            .unwrap_or(conn_defaults.idle_threshold),
        timeout: raw_connections
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(conn_defaults.timeout),
        reconnect,
    };

    let raw_limits = raw.limits.unwrap_or_default();
    let limits_defaults = LimitsConfig::default();
    let limits = LimitsConfig {
        max_streams_per_peer: raw_limits
            .max_streams_per_peer
            .unwrap_or(limits_defaults.max_streams_per_peer),
        max_streams_total: raw_limits
            .max_streams_total
            .unwrap_or(limits_defaults.max_streams_total),
        max_pending_opens: raw_limits
            .max_pending_opens
            .unwrap_or(limits_defaults.max_pending_opens),
        stream_open_timeout: raw_limits
            .stream_open_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(limits_defaults.stream_open_timeout),
        buffer_size: raw_limits.buffer_size.unwrap_or(limits_defaults.buffer_size),
    };

    let raw_exit = raw.exit.unwrap_or_default();
    let mut routes = Vec::new();
    for (i, r) in raw_exit.routes.unwrap_or_default().into_iter().enumerate() {
        let net: ipnet::IpNet = r
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("exit.routes[{i}] '{r}' is not a valid CIDR")))?;
        routes.push(net);
    }
    let raw_dns = raw_exit.dns.unwrap_or_default();
    let dns_defaults = DnsConfig::default();
    let exit = ExitConfig {
        enabled: raw_exit.enabled.unwrap_or(false),
        routes,
        dns: DnsConfig {
            servers: raw_dns.servers.unwrap_or(dns_defaults.servers),
            timeout: raw_dns.timeout_secs.map(Duration::from_secs).unwrap_or(dns_defaults.timeout),
        },
    };

    let raw_socks5 = raw.socks5.unwrap_or_default();
    let socks5_defaults = Socks5Config::default();
    let auth = raw_socks5.auth.and_then(|a| match (a.username, a.password) {
        (Some(username), Some(password)) => Some(Socks5AuthConfig { username, password }),
        _ => None,
    });
    let socks5 = Socks5Config {
        enabled: raw_socks5.enabled.unwrap_or(socks5_defaults.enabled),
        address: raw_socks5.address.unwrap_or(socks5_defaults.address),
        auth,
    };

    Ok(Config {
        agent,
        listeners,
        peers,
        routing,
        connections,
        limits,
        exit,
        socks5,
    })
}

/// Load and validate configuration from a TOML file on disk.
pub fn load_from_path(path: &std::path::Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_from_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_sane_defaults() {
        let toml = r#"
            [agent]
            data_dir = "/tmp/muti-metroo"
        "#;
        let cfg = load_from_str(toml).unwrap();
        assert!(cfg.agent.id.is_none());
        assert_eq!(cfg.routing.max_hops, 16);
        assert_eq!(cfg.limits.max_streams_per_peer, 1_000);
        assert!(!cfg.exit.enabled);
        assert!(!cfg.socks5.enabled);
    }

    #[test]
    fn env_substitution_applies_before_parsing() {
        std::env::set_var("MM_TEST_DATA_DIR", "/var/lib/muti-metroo");
        let toml = r#"
            [agent]
            data_dir = "${MM_TEST_DATA_DIR}"
        "#;
        let cfg = load_from_str(toml).unwrap();
        assert_eq!(cfg.agent.data_dir, PathBuf::from("/var/lib/muti-metroo"));
        std::env::remove_var("MM_TEST_DATA_DIR");
    }

    #[test]
    fn listener_transport_and_tls_are_parsed() {
        let toml = r#"
            [agent]
            data_dir = "/tmp/mm"

            [[listeners]]
            transport = "quic"
            address = "0.0.0.0:4433"

            [[listeners]]
            transport = "ws"
            address = "0.0.0.0:8443"
            path = "/tunnel"

            [listeners.tls]
            strict = true
        "#;
        let cfg = load_from_str(toml).unwrap();
        assert_eq!(cfg.listeners.len(), 2);
        assert_eq!(cfg.listeners[0].transport, TransportKind::Quic);
        assert_eq!(cfg.listeners[1].path.as_deref(), Some("/tunnel"));
    }

    #[test]
    fn invalid_transport_is_rejected() {
        let toml = r#"
            [agent]
            data_dir = "/tmp/mm"

            [[listeners]]
            transport = "carrier-pigeon"
            address = "0.0.0.0:1"
        "#;
        assert!(load_from_str(toml).is_err());
    }

    #[test]
    fn missing_data_dir_is_rejected() {
        let toml = "[agent]\n";
        assert!(load_from_str(toml).is_err());
    }

    #[test]
    fn exit_routes_must_be_valid_cidrs() {
        let toml = r#"
            [agent]
            data_dir = "/tmp/mm"
            [exit]
            enabled = true
            routes = ["10.0.0.0/8", "not-a-cidr"]
        "#;
        assert!(load_from_str(toml).is_err());
    }
}
