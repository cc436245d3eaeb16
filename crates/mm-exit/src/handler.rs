//! `mm_stream::ExitHandler` implementation backed by real TCP sockets
//! (§4.9).

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::net::TcpStream;

use mm_crypto::{generate_keypair, PublicKey};
use mm_protocol::payload::{Address, StreamOpen};
use mm_stream::{ExitOpened, StreamError};

use crate::error::ExitError;
use crate::sink::TcpSink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which destinations this exit will serve. Empty `routes` means wide open
/// (every destination allowed); a non-empty list restricts dialing to
/// addresses contained by at least one advertised exit CIDR (§4.9 "Advertised
/// CIDRs in C3's exit routes define what destinations this agent will
/// serve").
#[derive(Debug, Clone, Default)]
pub struct ExitAllowlist {
    routes: Vec<IpNet>,
}

impl ExitAllowlist {
    pub fn new(routes: Vec<IpNet>) -> Self {
        ExitAllowlist { routes }
    }

    pub fn permits(&self, addr: IpAddr) -> bool {
        self.routes.is_empty() || self.routes.iter().any(|route| route.contains(&addr))
    }
}

/// Resolves, allow-list checks, and dials real TCP sockets for incoming
/// `STREAM_OPEN`s that have reached their final hop.
pub struct TcpExitHandler {
    allowlist: ExitAllowlist,
    dns_servers: Vec<String>,
    dns_timeout: Duration,
}

impl TcpExitHandler {
    pub fn new(allowlist: ExitAllowlist, dns_servers: Vec<String>, dns_timeout: Duration) -> Self {
        TcpExitHandler {
            allowlist,
            dns_servers,
            dns_timeout,
        }
    }

    async fn resolve(&self, addr: &Address, port: u16) -> Result<SocketAddr, ExitError> {
        match addr {
            Address::V4(ip) => Ok(SocketAddr::new(IpAddr::V4(*ip), port)),
            Address::V6(ip) => Ok(SocketAddr::new(IpAddr::V6(*ip), port)),
            Address::Domain(domain) => {
                // `mm-config`'s `exit.dns.servers` is currently advisory —
                // this binary has no resolver-selection crate in its stack,
                // so domain lookups always go through the OS resolver
                // (`tokio::net::lookup_host`), which honors `/etc/resolv.conf`.
                if !self.dns_servers.is_empty() {
                    tracing::debug!(
                        servers = ?self.dns_servers,
                        "exit.dns.servers configured but unused; resolving via the system resolver"
                    );
                }

                let lookup = tokio::time::timeout(self.dns_timeout, tokio::net::lookup_host((domain.as_str(), port)))
                    .await
                    .map_err(|_| ExitError::DnsTimeout)?
                    .map_err(ExitError::Dns)?;

                lookup
                    .into_iter()
                    .next()
                    .ok_or_else(|| ExitError::Dns(io::Error::new(io::ErrorKind::NotFound, "no addresses returned")))
            }
        }
    }

    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, ExitError> {
        let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await;
        match connect {
            Err(_) => Err(ExitError::ConnectionTimeout),
            Ok(Err(e)) => Err(classify_connect_error(e)),
            Ok(Ok(stream)) => Ok(stream),
        }
    }
}

fn classify_connect_error(e: io::Error) -> ExitError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ExitError::ConnectionRefused,
        io::ErrorKind::TimedOut => ExitError::ConnectionTimeout,
        io::ErrorKind::HostUnreachable => ExitError::HostUnreachable,
        io::ErrorKind::NetworkUnreachable => ExitError::NetworkUnreachable,
        _ => ExitError::Io(e),
    }
}

fn to_wire_address(addr: SocketAddr) -> Address {
    match addr.ip() {
        IpAddr::V4(ip) => Address::V4(ip),
        IpAddr::V6(ip) => Address::V6(ip),
    }
}

#[async_trait]
impl mm_stream::ExitHandler for TcpExitHandler {
    async fn handle_open(&self, open: &StreamOpen) -> Result<ExitOpened, StreamError> {
        let resolved = self.resolve(&open.addr, open.port).await.map_err(|e| {
            tracing::debug!(dest = ?open.addr, port = open.port, error = %e, "exit resolve failed");
            StreamError::from(&e)
        })?;

        if !self.allowlist.permits(resolved.ip()) {
            tracing::debug!(dest = %resolved, "exit destination rejected by allow-list");
            return Err(StreamError::NotAllowed);
        }

        let stream = self.dial(resolved).await.map_err(|e| {
            tracing::debug!(dest = %resolved, error = %e, "exit dial failed");
            StreamError::from(&e)
        })?;
        let bound_addr_sock = stream.local_addr().map_err(|e| StreamError::from(&ExitError::Io(e)))?;

        let mut rng = rand::rngs::OsRng;
        let (our_priv, our_pub) = generate_keypair(&mut rng);
        let their_pub = PublicKey::from_bytes(open.ephemeral_pub)
            .require_nonzero()
            .map_err(|_| StreamError::from(&ExitError::BadEphemeralKey))?;
        let shared = our_priv.diffie_hellman(&their_pub);
        let session_key = mm_crypto::derive_session_key(&shared, open.request_id, open.ephemeral_pub, our_pub.to_bytes(), false);

        tracing::info!(dest = %resolved, request_id = open.request_id, "exit stream opened");

        Ok(ExitOpened {
            bound_addr: to_wire_address(bound_addr_sock),
            bound_port: bound_addr_sock.port(),
            ephemeral_pub: our_pub.to_bytes(),
            session_key,
            sink: Arc::new(TcpSink::spawn(stream)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_permits_everything() {
        let allow = ExitAllowlist::default();
        assert!(allow.permits("1.2.3.4".parse().unwrap()));
        assert!(allow.permits("::1".parse().unwrap()));
    }

    #[test]
    fn nonempty_allowlist_restricts_to_configured_routes() {
        let allow = ExitAllowlist::new(vec!["10.0.0.0/8".parse().unwrap()]);
        assert!(allow.permits("10.1.2.3".parse().unwrap()));
        assert!(!allow.permits("8.8.8.8".parse().unwrap()));
    }
}
