//! RFC1928 request parsing (§4.9: "parse CONNECT with addr_type ∈ {IPv4,
//! IPv6, domain} + port") and reply encoding.

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mm_protocol::payload::Address;

use crate::error::{ReplyCode, Socks5Error};

const SOCKS_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const CMD_BIND: u8 = 0x02;
const CMD_UDP_ASSOCIATE: u8 = 0x03;
const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

pub struct Request {
    pub command: Command,
    pub addr: Address,
    pub port: u16,
}

pub async fn read_request(stream: &mut TcpStream) -> Result<Request, Socks5Error> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    let [version, cmd, _rsv, atyp] = head;
    if version != SOCKS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let command = match cmd {
        CMD_CONNECT => Command::Connect,
        CMD_BIND => Command::Bind,
        CMD_UDP_ASSOCIATE => Command::UdpAssociate,
        other => return Err(Socks5Error::UnsupportedCommand(other)),
    };

    let addr = match atyp {
        ATYP_V4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Address::V4(Ipv4Addr::from(octets))
        }
        ATYP_V6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Address::V6(Ipv6Addr::from(octets))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            Address::Domain(String::from_utf8(buf).map_err(|_| Socks5Error::BadDomain)?)
        }
        other => return Err(Socks5Error::UnsupportedAddressType(other)),
    };

    let port = stream.read_u16().await?;

    Ok(Request { command, addr, port })
}

/// Encodes a SOCKS5 reply. On success `bound_addr`/`bound_port` should be
/// the `STREAM_OPEN_ACK`'s values (§4.9); on failure any address is fine
/// since clients only look at the reply code (the dummy bound-address
/// pattern real SOCKS5 implementations use on error paths).
pub fn encode_reply(code: ReplyCode, bound_addr: &Address, bound_port: u16) -> Vec<u8> {
    let mut buf = vec![SOCKS_VERSION, code as u8, 0x00];
    match bound_addr {
        Address::V4(ip) => {
            buf.push(ATYP_V4);
            buf.extend_from_slice(&ip.octets());
        }
        Address::V6(ip) => {
            buf.push(ATYP_V6);
            buf.extend_from_slice(&ip.octets());
        }
        Address::Domain(name) => {
            buf.push(ATYP_DOMAIN);
            buf.push(name.len() as u8);
            buf.extend_from_slice(name.as_bytes());
        }
    }
    buf.extend_from_slice(&bound_port.to_be_bytes());
    buf
}

/// Writes a reply straight to a not-yet-split socket (used for the
/// handshake-level failures that never reach `StreamManager::open`).
pub async fn write_reply(
    stream: &mut TcpStream,
    code: ReplyCode,
    bound_addr: Address,
    bound_port: u16,
) -> std::io::Result<()> {
    let buf = encode_reply(code, &bound_addr, bound_port);
    stream.write_all(&buf).await
}

pub fn unroutable_reply_addr() -> Address {
    Address::V4(Ipv4Addr::UNSPECIFIED)
}
