//! Typed payload parsers/builders for each [`crate::FrameType`].
//!
//! All multi-byte integers are big-endian (§4.1). Decoding never reads past
//! the frame's declared `length`; these parsers operate on an already
//! length-bounded slice (the frame payload), so a malformed inner length
//! prefix simply errors rather than reading adjacent frames' bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::agent_id::AgentId;
use crate::error::DecodeError;

/// Destination address carried in `STREAM_OPEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    V4(std::net::Ipv4Addr),
    V6(std::net::Ipv6Addr),
    Domain(String),
}

impl Address {
    fn addr_type(&self) -> u8 {
        match self {
            Address::V4(_) => 1,
            Address::V6(_) => 4,
            Address::Domain(_) => 3,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.addr_type());
        match self {
            Address::V4(ip) => buf.put_slice(&ip.octets()),
            Address::V6(ip) => buf.put_slice(&ip.octets()),
            Address::Domain(name) => {
                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
            }
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::MalformedPayload("missing address type"));
        }
        let addr_type = buf.get_u8();
        match addr_type {
            1 => {
                if buf.len() < 4 {
                    return Err(DecodeError::MalformedPayload("short ipv4 address"));
                }
                let mut octets = [0u8; 4];
                buf.copy_to_slice(&mut octets);
                Ok(Address::V4(std::net::Ipv4Addr::from(octets)))
            }
            4 => {
                if buf.len() < 16 {
                    return Err(DecodeError::MalformedPayload("short ipv6 address"));
                }
                let mut octets = [0u8; 16];
                buf.copy_to_slice(&mut octets);
                Ok(Address::V6(std::net::Ipv6Addr::from(octets)))
            }
            3 => {
                if buf.is_empty() {
                    return Err(DecodeError::MalformedPayload("missing domain length"));
                }
                let len = buf.get_u8() as usize;
                if buf.len() < len {
                    return Err(DecodeError::MalformedPayload("short domain name"));
                }
                let raw = buf.split_to(len);
                let domain = String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadUtf8)?;
                Ok(Address::Domain(domain))
            }
            other => Err(DecodeError::InvalidAddressFamily(other)),
        }
    }
}

fn encode_path(buf: &mut BytesMut, path: &[AgentId]) {
    buf.put_u8(path.len() as u8);
    for agent in path {
        buf.put_slice(agent.as_bytes());
    }
}

fn decode_path(buf: &mut Bytes) -> Result<Vec<AgentId>, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::MalformedPayload("missing path length"));
    }
    let count = buf.get_u8() as usize;
    if buf.len() < count * AgentId::LEN {
        return Err(DecodeError::MalformedPayload("short path list"));
    }
    let mut path = Vec::with_capacity(count);
    for _ in 0..count {
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        path.push(AgentId::from_bytes(bytes));
    }
    Ok(path)
}

fn get_agent_id(buf: &mut Bytes) -> Result<AgentId, DecodeError> {
    if buf.len() < AgentId::LEN {
        return Err(DecodeError::MalformedPayload("short agent id"));
    }
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(AgentId::from_bytes(bytes))
}

fn get_pubkey(buf: &mut Bytes) -> Result<[u8; 32], DecodeError> {
    if buf.len() < 32 {
        return Err(DecodeError::MalformedPayload("short public key"));
    }
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn get_string_u8(buf: &mut Bytes) -> Result<String, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::MalformedPayload("missing string length"));
    }
    let len = buf.get_u8() as usize;
    if buf.len() < len {
        return Err(DecodeError::MalformedPayload("short string"));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadUtf8)
}

fn put_string_u8(buf: &mut BytesMut, s: &str) {
    buf.put_u8(s.len() as u8);
    buf.put_slice(s.as_bytes());
}

/// Frozen wire error codes (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NoRoute = 1,
    ConnectionRefused = 2,
    ConnectionTimeout = 3,
    TtlExceeded = 4,
    HostUnreachable = 5,
    NetworkUnreachable = 6,
    DnsError = 7,
    ExitDisabled = 8,
    ResourceLimit = 9,
    NotAllowed = 11,
    GeneralFailure = 18,
}

impl ErrorCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => ErrorCode::NoRoute,
            2 => ErrorCode::ConnectionRefused,
            3 => ErrorCode::ConnectionTimeout,
            4 => ErrorCode::TtlExceeded,
            5 => ErrorCode::HostUnreachable,
            6 => ErrorCode::NetworkUnreachable,
            7 => ErrorCode::DnsError,
            8 => ErrorCode::ExitDisabled,
            9 => ErrorCode::ResourceLimit,
            11 => ErrorCode::NotAllowed,
            18 => ErrorCode::GeneralFailure,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOpen {
    pub request_id: u64,
    pub addr: Address,
    pub port: u16,
    pub ttl: u8,
    pub remaining_path: Vec<AgentId>,
    pub ephemeral_pub: [u8; 32],
}

impl StreamOpen {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64(self.request_id);
        self.addr.encode(&mut buf);
        buf.put_u16(self.port);
        buf.put_u8(self.ttl);
        encode_path(&mut buf, &self.remaining_path);
        buf.put_slice(&self.ephemeral_pub);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 8 {
            return Err(DecodeError::MalformedPayload("short stream_open header"));
        }
        let request_id = buf.get_u64();
        let addr = Address::decode(&mut buf)?;
        if buf.len() < 3 {
            return Err(DecodeError::MalformedPayload("short stream_open tail"));
        }
        let port = buf.get_u16();
        let ttl = buf.get_u8();
        let remaining_path = decode_path(&mut buf)?;
        let ephemeral_pub = get_pubkey(&mut buf)?;
        Ok(StreamOpen {
            request_id,
            addr,
            port,
            ttl,
            remaining_path,
            ephemeral_pub,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOpenAck {
    pub request_id: u64,
    pub bound_addr: Address,
    pub bound_port: u16,
    pub ephemeral_pub: [u8; 32],
}

impl StreamOpenAck {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64(self.request_id);
        self.bound_addr.encode(&mut buf);
        buf.put_u16(self.bound_port);
        buf.put_slice(&self.ephemeral_pub);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 8 {
            return Err(DecodeError::MalformedPayload("short stream_open_ack header"));
        }
        let request_id = buf.get_u64();
        let bound_addr = Address::decode(&mut buf)?;
        if buf.len() < 2 {
            return Err(DecodeError::MalformedPayload("short stream_open_ack port"));
        }
        let bound_port = buf.get_u16();
        let ephemeral_pub = get_pubkey(&mut buf)?;
        Ok(StreamOpenAck {
            request_id,
            bound_addr,
            bound_port,
            ephemeral_pub,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOpenErr {
    pub request_id: u64,
    pub error_code: u16,
    pub message: String,
}

impl StreamOpenErr {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64(self.request_id);
        buf.put_u16(self.error_code);
        put_string_u8(&mut buf, &self.message);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 10 {
            return Err(DecodeError::MalformedPayload("short stream_open_err"));
        }
        let request_id = buf.get_u64();
        let error_code = buf.get_u16();
        let message = get_string_u8(&mut buf)?;
        Ok(StreamOpenErr {
            request_id,
            error_code,
            message,
        })
    }
}

/// Encrypted `STREAM_DATA` payload shape: `12B nonce || ciphertext || 16B tag`.
/// This crate does not touch the ciphertext — `mm-crypto` seals/opens it —
/// it only knows how to split/join the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData {
    pub nonce: [u8; 12],
    pub ciphertext_and_tag: Bytes,
}

impl StreamData {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.ciphertext_and_tag.len());
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.ciphertext_and_tag);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 12 + 16 {
            return Err(DecodeError::MalformedPayload("short stream_data envelope"));
        }
        let mut nonce = [0u8; 12];
        buf.copy_to_slice(&mut nonce);
        Ok(StreamData {
            nonce,
            ciphertext_and_tag: buf,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamReset {
    pub error_code: u16,
}

impl StreamReset {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(self.error_code);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::MalformedPayload("short stream_reset"));
        }
        Ok(StreamReset {
            error_code: buf.get_u16(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    fn code(self) -> u8 {
        match self {
            AddressFamily::V4 => 1,
            AddressFamily::V6 => 4,
        }
    }

    fn from_code(b: u8) -> Result<Self, DecodeError> {
        match b {
            1 => Ok(AddressFamily::V4),
            4 => Ok(AddressFamily::V6),
            other => Err(DecodeError::InvalidAddressFamily(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntryWire {
    pub family: AddressFamily,
    pub prefix: Vec<u8>,
    pub prefix_len: u8,
    pub metric: u16,
}

impl RouteEntryWire {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.family.code());
        buf.put_u8(self.prefix_len);
        buf.put_slice(&self.prefix);
        buf.put_u16(self.metric);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::MalformedPayload("short route entry header"));
        }
        let family = AddressFamily::from_code(buf.get_u8())?;
        let prefix_len = buf.get_u8();
        let prefix_bytes = match family {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 16,
        };
        if buf.len() < prefix_bytes + 2 {
            return Err(DecodeError::MalformedPayload("short route entry body"));
        }
        let prefix = buf.split_to(prefix_bytes).to_vec();
        let metric = buf.get_u16();
        Ok(RouteEntryWire {
            family,
            prefix,
            prefix_len,
            metric,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAdvertise {
    pub origin: AgentId,
    pub sequence: u64,
    pub routes: Vec<RouteEntryWire>,
    pub path: Vec<AgentId>,
    pub seen_by: Vec<AgentId>,
}

impl RouteAdvertise {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(self.origin.as_bytes());
        buf.put_u64(self.sequence);
        buf.put_u16(self.routes.len() as u16);
        for route in &self.routes {
            route.encode(&mut buf);
        }
        encode_path(&mut buf, &self.path);
        buf.put_u8(self.seen_by.len() as u8);
        for agent in &self.seen_by {
            buf.put_slice(agent.as_bytes());
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        let origin = get_agent_id(&mut buf)?;
        if buf.len() < 10 {
            return Err(DecodeError::MalformedPayload("short route_advertise header"));
        }
        let sequence = buf.get_u64();
        let route_count = buf.get_u16() as usize;
        let mut routes = Vec::with_capacity(route_count);
        for _ in 0..route_count {
            routes.push(RouteEntryWire::decode(&mut buf)?);
        }
        let path = decode_path(&mut buf)?;
        if buf.is_empty() {
            return Err(DecodeError::MalformedPayload("missing seen_by length"));
        }
        let seen_count = buf.get_u8() as usize;
        if buf.len() < seen_count * AgentId::LEN {
            return Err(DecodeError::MalformedPayload("short seen_by list"));
        }
        let mut seen_by = Vec::with_capacity(seen_count);
        for _ in 0..seen_count {
            seen_by.push(get_agent_id(&mut buf)?);
        }
        Ok(RouteAdvertise {
            origin,
            sequence,
            routes,
            path,
            seen_by,
        })
    }
}

/// `ROUTE_WITHDRAW` shares the exact envelope of `ROUTE_ADVERTISE`; the
/// `routes` list names entries to delete rather than entries to insert.
pub type RouteWithdraw = RouteAdvertise;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfoAdvertise {
    pub origin: AgentId,
    pub sequence: u64,
    pub encrypted: bool,
    pub data: Bytes,
    pub seen_by: Vec<AgentId>,
}

impl NodeInfoAdvertise {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(self.origin.as_bytes());
        buf.put_u64(self.sequence);
        buf.put_u8(u8::from(self.encrypted));
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.put_u8(self.seen_by.len() as u8);
        for agent in &self.seen_by {
            buf.put_slice(agent.as_bytes());
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        let origin = get_agent_id(&mut buf)?;
        if buf.len() < 13 {
            return Err(DecodeError::MalformedPayload("short node_info header"));
        }
        let sequence = buf.get_u64();
        let encrypted = buf.get_u8() != 0;
        let data_len = buf.get_u32() as usize;
        if buf.len() < data_len {
            return Err(DecodeError::MalformedPayload("short node_info data"));
        }
        let data = buf.split_to(data_len);
        if buf.is_empty() {
            return Err(DecodeError::MalformedPayload("missing seen_by length"));
        }
        let seen_count = buf.get_u8() as usize;
        if buf.len() < seen_count * AgentId::LEN {
            return Err(DecodeError::MalformedPayload("short seen_by list"));
        }
        let mut seen_by = Vec::with_capacity(seen_count);
        for _ in 0..seen_count {
            seen_by.push(get_agent_id(&mut buf)?);
        }
        Ok(NodeInfoAdvertise {
            origin,
            sequence,
            encrypted,
            data,
            seen_by,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHello {
    pub version: u16,
    pub agent_id: AgentId,
    pub timestamp: u64,
    pub capabilities: Vec<String>,
}

impl PeerHello {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(self.version);
        buf.put_slice(self.agent_id.as_bytes());
        buf.put_u64(self.timestamp);
        buf.put_u8(self.capabilities.len() as u8);
        for cap in &self.capabilities {
            put_string_u8(&mut buf, cap);
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::MalformedPayload("short peer_hello version"));
        }
        let version = buf.get_u16();
        let agent_id = get_agent_id(&mut buf)?;
        if buf.len() < 9 {
            return Err(DecodeError::MalformedPayload("short peer_hello tail"));
        }
        let timestamp = buf.get_u64();
        let cap_count = buf.get_u8() as usize;
        let mut capabilities = Vec::with_capacity(cap_count);
        for _ in 0..cap_count {
            capabilities.push(get_string_u8(&mut buf)?);
        }
        Ok(PeerHello {
            version,
            agent_id,
            timestamp,
            capabilities,
        })
    }
}

/// `PEER_HELLO_ACK` shares `PeerHello`'s shape.
pub type PeerHelloAck = PeerHello;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub timestamp: u64,
}

impl Keepalive {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64(self.timestamp);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.len() < 8 {
            return Err(DecodeError::MalformedPayload("short keepalive"));
        }
        Ok(Keepalive {
            timestamp: buf.get_u64(),
        })
    }
}

pub type KeepaliveAck = Keepalive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub sub_type: u8,
    pub body: Bytes,
}

impl ControlRequest {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.body.len());
        buf.put_u8(self.sub_type);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::MalformedPayload("missing control sub_type"));
        }
        let sub_type = buf.get_u8();
        Ok(ControlRequest {
            sub_type,
            body: buf,
        })
    }
}

pub type ControlResponse = ControlRequest;

/// Decoded, typed view over a frame's payload.
///
/// `Unknown` carries the raw bytes of any frame type this crate doesn't
/// (yet) interpret, per §9: unrecognized tags are logged and dropped, never
/// treated as a hard decode error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    StreamOpen(StreamOpen),
    StreamOpenAck(StreamOpenAck),
    StreamOpenErr(StreamOpenErr),
    StreamData(StreamData),
    StreamClose,
    StreamReset(StreamReset),
    RouteAdvertise(RouteAdvertise),
    RouteWithdraw(RouteWithdraw),
    NodeInfoAdvertise(NodeInfoAdvertise),
    PeerHello(PeerHello),
    PeerHelloAck(PeerHelloAck),
    Keepalive(Keepalive),
    KeepaliveAck(KeepaliveAck),
    ControlRequest(ControlRequest),
    ControlResponse(ControlResponse),
    Unknown(u8, Bytes),
}

impl Payload {
    pub fn parse(frame: &crate::Frame) -> Result<Payload, DecodeError> {
        use crate::FrameType::*;
        let body = frame.payload.clone();
        Ok(match frame.header.frame_type {
            StreamOpen => Payload::StreamOpen(self::StreamOpen::decode(body)?),
            StreamOpenAck => Payload::StreamOpenAck(self::StreamOpenAck::decode(body)?),
            StreamOpenErr => Payload::StreamOpenErr(self::StreamOpenErr::decode(body)?),
            StreamData => Payload::StreamData(self::StreamData::decode(body)?),
            StreamClose => Payload::StreamClose,
            StreamReset => Payload::StreamReset(self::StreamReset::decode(body)?),
            RouteAdvertise => Payload::RouteAdvertise(self::RouteAdvertise::decode(body)?),
            crate::FrameType::RouteWithdraw => {
                Payload::RouteWithdraw(self::RouteWithdraw::decode(body)?)
            }
            NodeInfoAdvertise => Payload::NodeInfoAdvertise(self::NodeInfoAdvertise::decode(body)?),
            PeerHello => Payload::PeerHello(self::PeerHello::decode(body)?),
            PeerHelloAck => Payload::PeerHelloAck(self::PeerHelloAck::decode(body)?),
            Keepalive => Payload::Keepalive(self::Keepalive::decode(body)?),
            KeepaliveAck => Payload::KeepaliveAck(self::KeepaliveAck::decode(body)?),
            ControlRequest => Payload::ControlRequest(self::ControlRequest::decode(body)?),
            ControlResponse => Payload::ControlResponse(self::ControlResponse::decode(body)?),
            Unknown(code) => Payload::Unknown(code, body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Flags, Frame, FrameType};

    fn aid(byte: u8) -> AgentId {
        AgentId::from_bytes([byte; 16])
    }

    #[test]
    fn stream_open_round_trips_with_domain_address() {
        let open = StreamOpen {
            request_id: 42,
            addr: Address::Domain("example.com".to_owned()),
            port: 9000,
            ttl: 5,
            remaining_path: vec![aid(1), aid(2)],
            ephemeral_pub: [7u8; 32],
        };
        let encoded = open.encode();
        let decoded = StreamOpen::decode(encoded).unwrap();
        assert_eq!(decoded, open);
    }

    #[test]
    fn stream_open_round_trips_with_v4_and_v6() {
        for addr in [
            Address::V4(std::net::Ipv4Addr::new(10, 0, 0, 1)),
            Address::V6(std::net::Ipv6Addr::LOCALHOST),
        ] {
            let open = StreamOpen {
                request_id: 1,
                addr,
                port: 80,
                ttl: 16,
                remaining_path: vec![],
                ephemeral_pub: [0u8; 32],
            };
            let decoded = StreamOpen::decode(open.encode()).unwrap();
            assert_eq!(decoded, open);
        }
    }

    #[test]
    fn route_advertise_round_trips_via_payload_parse() {
        let adv = RouteAdvertise {
            origin: aid(9),
            sequence: 7,
            routes: vec![RouteEntryWire {
                family: AddressFamily::V4,
                prefix: vec![10, 0, 0, 0],
                prefix_len: 8,
                metric: 1,
            }],
            path: vec![aid(1)],
            seen_by: vec![aid(1), aid(9)],
        };
        let frame = Frame::control(FrameType::RouteAdvertise, adv.encode());
        match Payload::parse(&frame).unwrap() {
            Payload::RouteAdvertise(decoded) => assert_eq!(decoded, adv),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_parses_as_unknown_payload() {
        let frame = Frame::new(
            FrameType::Unknown(0x99),
            Flags::empty(),
            0,
            Bytes::from_static(b"raw"),
        );
        match Payload::parse(&frame).unwrap() {
            Payload::Unknown(code, bytes) => {
                assert_eq!(code, 0x99);
                assert_eq!(bytes, Bytes::from_static(b"raw"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn truncated_stream_open_err_is_rejected() {
        let err = StreamOpenErr::decode(Bytes::from_static(b"short"));
        assert!(err.is_err());
    }
}
