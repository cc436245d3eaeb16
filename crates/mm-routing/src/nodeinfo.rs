//! Wire encoding for the non-CIDR route families that ride inside
//! `NODE_INFO_ADVERTISE`'s opaque payload (§3, §4.4): domain routes,
//! agent-presence, and forward-key routes. `ROUTE_ADVERTISE`/`_WITHDRAW`
//! only carry CIDR-shaped entries (see [`crate::flood`]); everything else
//! is flooded through this body instead, sharing the same origin/sequence
//! freshness check.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use mm_protocol::AgentId;

use crate::types::{AgentPresenceEntry, DomainRouteEntry, ForwardKeyEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NodeInfoCodecError {
    #[error("node info body is truncated")]
    Truncated,
    #[error("node info body contains invalid utf-8")]
    BadUtf8,
}

fn put_agent(buf: &mut BytesMut, id: AgentId) {
    buf.put_slice(id.as_bytes());
}

fn get_agent(buf: &mut Bytes) -> Result<AgentId, NodeInfoCodecError> {
    if buf.len() < AgentId::LEN {
        return Err(NodeInfoCodecError::Truncated);
    }
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(AgentId::from_bytes(bytes))
}

fn put_path(buf: &mut BytesMut, path: &[AgentId]) {
    buf.put_u8(path.len() as u8);
    for id in path {
        put_agent(buf, *id);
    }
}

fn get_path(buf: &mut Bytes) -> Result<Vec<AgentId>, NodeInfoCodecError> {
    if buf.is_empty() {
        return Err(NodeInfoCodecError::Truncated);
    }
    let count = buf.get_u8() as usize;
    let mut path = Vec::with_capacity(count);
    for _ in 0..count {
        path.push(get_agent(buf)?);
    }
    Ok(path)
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String, NodeInfoCodecError> {
    if buf.len() < 2 {
        return Err(NodeInfoCodecError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.len() < len {
        return Err(NodeInfoCodecError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| NodeInfoCodecError::BadUtf8)
}

/// One advertised domain route, stripped of the bookkeeping fields
/// (`origin`/`next_hop`/`path`/`sequence`/`expires_at`) that the flood
/// engine fills in from the envelope, not the entry itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRouteWire {
    pub pattern: String,
    pub is_wildcard: bool,
    pub base_domain: String,
    pub metric: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceWire {
    pub metric: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardKeyWire {
    pub key: String,
    pub target_host_port: String,
    pub metric: u16,
}

/// The decoded (or to-be-encoded) contents of a `NODE_INFO_ADVERTISE`
/// payload, before origin/sequence/seen_by (owned by the envelope) and
/// before the per-hop path/metric bump the flood engine applies on
/// receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfoBody {
    pub domains: Vec<DomainRouteWire>,
    /// `true` when this agent is advertising its own presence, always at
    /// metric 0 (§3: "every agent unconditionally advertises its own
    /// presence").
    pub presence: Option<PresenceWire>,
    pub forward_keys: Vec<ForwardKeyWire>,
}

impl NodeInfoBody {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(self.domains.len() as u16);
        for d in &self.domains {
            buf.put_u8(u8::from(d.is_wildcard));
            put_string(&mut buf, &d.pattern);
            put_string(&mut buf, &d.base_domain);
            buf.put_u16(d.metric);
        }
        buf.put_u8(u8::from(self.presence.is_some()));
        if let Some(p) = &self.presence {
            buf.put_u16(p.metric);
        }
        buf.put_u16(self.forward_keys.len() as u16);
        for f in &self.forward_keys {
            put_string(&mut buf, &f.key);
            put_string(&mut buf, &f.target_host_port);
            buf.put_u16(f.metric);
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, NodeInfoCodecError> {
        if buf.len() < 2 {
            return Err(NodeInfoCodecError::Truncated);
        }
        let domain_count = buf.get_u16() as usize;
        let mut domains = Vec::with_capacity(domain_count);
        for _ in 0..domain_count {
            if buf.is_empty() {
                return Err(NodeInfoCodecError::Truncated);
            }
            let is_wildcard = buf.get_u8() != 0;
            let pattern = get_string(&mut buf)?;
            let base_domain = get_string(&mut buf)?;
            if buf.len() < 2 {
                return Err(NodeInfoCodecError::Truncated);
            }
            let metric = buf.get_u16();
            domains.push(DomainRouteWire {
                pattern,
                is_wildcard,
                base_domain,
                metric,
            });
        }

        if buf.is_empty() {
            return Err(NodeInfoCodecError::Truncated);
        }
        let has_presence = buf.get_u8() != 0;
        let presence = if has_presence {
            if buf.len() < 2 {
                return Err(NodeInfoCodecError::Truncated);
            }
            Some(PresenceWire { metric: buf.get_u16() })
        } else {
            None
        };

        if buf.len() < 2 {
            return Err(NodeInfoCodecError::Truncated);
        }
        let fk_count = buf.get_u16() as usize;
        let mut forward_keys = Vec::with_capacity(fk_count);
        for _ in 0..fk_count {
            let key = get_string(&mut buf)?;
            let target_host_port = get_string(&mut buf)?;
            if buf.len() < 2 {
                return Err(NodeInfoCodecError::Truncated);
            }
            let metric = buf.get_u16();
            forward_keys.push(ForwardKeyWire {
                key,
                target_host_port,
                metric,
            });
        }

        Ok(NodeInfoBody {
            domains,
            presence,
            forward_keys,
        })
    }
}

/// Installs a freshly-decoded, freshness-checked [`NodeInfoBody`] into the
/// domain/presence/forward-key tables, mirroring [`crate::flood::FloodEngine::on_advertise`]'s
/// step 5 but for the non-CIDR families. The freshness/loop check itself is
/// shared with CIDR advertisements via [`crate::flood::FloodEngine::check_freshness`].
pub fn install(
    domains: &crate::DomainTable,
    presence: &crate::AgentPresenceTable,
    forward_keys: &crate::ForwardKeyTable,
    origin: AgentId,
    next_hop: AgentId,
    path: Vec<AgentId>,
    sequence: u64,
    expires_at: std::time::Instant,
    body: &NodeInfoBody,
) {
    for d in &body.domains {
        domains.upsert(DomainRouteEntry {
            pattern: d.pattern.clone(),
            is_wildcard: d.is_wildcard,
            base_domain: d.base_domain.clone(),
            origin,
            next_hop,
            path: path.clone(),
            metric: d.metric.saturating_add(1),
            sequence,
            expires_at,
        });
    }
    if let Some(p) = &body.presence {
        presence.upsert(AgentPresenceEntry {
            agent_id: origin,
            next_hop,
            path: path.clone(),
            metric: p.metric.saturating_add(1),
            sequence,
            expires_at,
        });
    }
    for f in &body.forward_keys {
        forward_keys.upsert(ForwardKeyEntry {
            key: f.key.clone(),
            origin,
            next_hop,
            path: path.clone(),
            metric: f.metric.saturating_add(1),
            sequence,
            target_host_port: f.target_host_port.clone(),
            expires_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_info_body_round_trips() {
        let body = NodeInfoBody {
            domains: vec![DomainRouteWire {
                pattern: "*.example.com".to_owned(),
                is_wildcard: true,
                base_domain: "example.com".to_owned(),
                metric: 1,
            }],
            presence: Some(PresenceWire { metric: 0 }),
            forward_keys: vec![ForwardKeyWire {
                key: "tunnel-a".to_owned(),
                target_host_port: "10.0.0.5:8080".to_owned(),
                metric: 2,
            }],
        };
        let decoded = NodeInfoBody::decode(body.encode()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn empty_body_round_trips() {
        let body = NodeInfoBody::default();
        let decoded = NodeInfoBody::decode(body.encode()).unwrap();
        assert_eq!(decoded, body);
    }
}
