//! Peer handshake (§4.6): `PEER_HELLO` / `PEER_HELLO_ACK` exchange over the
//! control substream (native-multiplex transports) or the one shared byte
//! stream (h2, WebSocket), before a connection is considered established.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use mm_protocol::payload::PeerHello;
use mm_protocol::{AgentId, Frame, FrameCodec, FrameType};
use mm_transport::{ByteStream, Connection};
use tokio_util::codec::Framed;

use crate::error::PeerError;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PROTOCOL_VERSION: u16 = 1;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// What a completed handshake hands back: the peer's declared identity and
/// capabilities, plus the byte stream to hand to `writer::spawn_multiplexed`
/// / `writer::spawn_single_stream`.
pub struct HandshakeOutcome {
    pub peer_id: AgentId,
    pub capabilities: Vec<String>,
    pub control_stream: Box<dyn ByteStream>,
}

/// Dialer side: open the control stream, send `PEER_HELLO`, await
/// `PEER_HELLO_ACK` within [`HANDSHAKE_TIMEOUT`].
pub async fn dial_handshake(
    connection: &dyn Connection,
    local_agent: AgentId,
    capabilities: Vec<String>,
    expected_agent_id: Option<AgentId>,
) -> Result<HandshakeOutcome, PeerError> {
    let byte_stream = connection.open_stream().await?;
    let mut framed = Framed::new(byte_stream, FrameCodec::new());

    let hello = PeerHello {
        version: PROTOCOL_VERSION,
        agent_id: local_agent,
        timestamp: now_millis(),
        capabilities,
    };
    framed
        .send(Frame::control(FrameType::PeerHello, hello.encode()))
        .await?;

    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next())
        .await
        .map_err(|_| PeerError::HandshakeTimeout)?
        .ok_or(PeerError::ConnectionClosed)??;

    if frame.header.frame_type != FrameType::PeerHelloAck {
        return Err(PeerError::ConnectionClosed);
    }
    let ack = PeerHello::decode(frame.payload)?;
    check_hello(&ack, expected_agent_id)?;

    Ok(HandshakeOutcome {
        peer_id: ack.agent_id,
        capabilities: ack.capabilities,
        control_stream: framed.into_inner(),
    })
}

/// Listener side: accept the control stream, read `PEER_HELLO`, reply
/// `PEER_HELLO_ACK`.
pub async fn accept_handshake(
    connection: &dyn Connection,
    local_agent: AgentId,
    capabilities: Vec<String>,
    expected_agent_id: Option<AgentId>,
) -> Result<HandshakeOutcome, PeerError> {
    let byte_stream = connection.accept_stream().await?;
    let mut framed = Framed::new(byte_stream, FrameCodec::new());

    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next())
        .await
        .map_err(|_| PeerError::HandshakeTimeout)?
        .ok_or(PeerError::ConnectionClosed)??;

    if frame.header.frame_type != FrameType::PeerHello {
        return Err(PeerError::ConnectionClosed);
    }
    let hello = PeerHello::decode(frame.payload)?;
    check_hello(&hello, expected_agent_id)?;

    let ack = PeerHello {
        version: PROTOCOL_VERSION,
        agent_id: local_agent,
        timestamp: now_millis(),
        capabilities,
    };
    framed
        .send(Frame::control(FrameType::PeerHelloAck, ack.encode()))
        .await?;

    Ok(HandshakeOutcome {
        peer_id: hello.agent_id,
        capabilities: hello.capabilities,
        control_stream: framed.into_inner(),
    })
}

fn check_hello(hello: &PeerHello, expected_agent_id: Option<AgentId>) -> Result<(), PeerError> {
    if hello.version != PROTOCOL_VERSION {
        return Err(PeerError::VersionMismatch {
            ours: PROTOCOL_VERSION,
            theirs: hello.version,
        });
    }
    if let Some(expected) = expected_agent_id {
        if expected != hello.agent_id {
            return Err(PeerError::UnexpectedAgentId {
                expected,
                got: hello.agent_id,
            });
        }
    }
    Ok(())
}
