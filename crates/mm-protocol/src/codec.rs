use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, EncodeError};
use crate::frame::{Flags, Frame, FrameHeader, FrameType, HEADER_LEN, MAX_PAYLOAD_LEN};

/// A [`tokio_util::codec`] adapter framing the wire protocol described in
/// `spec.md` §4.1: 14-byte header, big-endian integers, payload capped at
/// [`MAX_PAYLOAD_LEN`] bytes. Used by both native-multiplex transports
/// (one `FrameCodec` per virtual stream) and single-byte-stream transports
/// (one `FrameCodec` for the whole connection, see `mm-stream`'s fairness
/// scheduler).
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Header of the frame currently being assembled, once parsed.
    partial: Option<FrameHeader>,
}

impl FrameCodec {
    pub fn new() -> Self {
        FrameCodec { partial: None }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        let header = match self.partial {
            Some(h) => h,
            None => {
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }
                let type_byte = src[0];
                let flags = Flags::from_bits(src[1]);
                let length = u32::from_be_bytes([src[2], src[3], src[4], src[5]]);
                if length as usize > MAX_PAYLOAD_LEN {
                    return Err(DecodeError::FrameTooLarge(length));
                }
                let stream_id = u64::from_be_bytes([
                    src[6], src[7], src[8], src[9], src[10], src[11], src[12], src[13],
                ]);
                let header = FrameHeader {
                    frame_type: FrameType::from_code(type_byte),
                    flags,
                    length,
                    stream_id,
                };
                src.advance(HEADER_LEN);
                self.partial = Some(header);
                header
            }
        };

        if src.len() < header.length as usize {
            src.reserve(header.length as usize - src.len());
            return Ok(None);
        }

        let payload = src.split_to(header.length as usize).freeze();
        self.partial = None;
        Ok(Some(Frame { header, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = EncodeError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), EncodeError> {
        encode_frame(&frame, dst)
    }
}

/// Encode a single frame into `dst`, appending to whatever is already there.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<(), EncodeError> {
    if frame.payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::FrameTooLarge(frame.payload.len()));
    }
    dst.reserve(HEADER_LEN + frame.payload.len());
    dst.put_u8(frame.header.frame_type.code());
    dst.put_u8(frame.header.flags.bits());
    dst.put_u32(frame.payload.len() as u32);
    dst.put_u64(frame.header.stream_id);
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Encode a frame to a freshly allocated buffer. Convenience wrapper for
/// call sites that don't already hold a `BytesMut` (e.g. unit tests).
pub fn encode(
    frame_type: FrameType,
    flags: Flags,
    stream_id: u64,
    payload: Bytes,
) -> Result<Bytes, EncodeError> {
    let frame = Frame::new(frame_type, flags, stream_id, payload);
    let mut buf = BytesMut::new();
    encode_frame(&frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one frame from `buf`, returning the frame and the number
/// of bytes consumed. Does not use the stateful [`FrameCodec`]; intended for
/// one-shot parsing (tests, or framing already handled by the transport).
pub fn decode(buf: &[u8]) -> Result<(FrameHeader, &[u8], usize), DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let length = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
    if length as usize > MAX_PAYLOAD_LEN {
        return Err(DecodeError::FrameTooLarge(length));
    }
    let total = HEADER_LEN + length as usize;
    if buf.len() < total {
        return Err(DecodeError::Truncated);
    }
    let stream_id = u64::from_be_bytes([
        buf[6], buf[7], buf[8], buf[9], buf[10], buf[11], buf[12], buf[13],
    ]);
    let header = FrameHeader {
        frame_type: FrameType::from_code(buf[0]),
        flags: Flags::from_bits(buf[1]),
        length,
        stream_id,
    };
    Ok((header, &buf[HEADER_LEN..total], total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_for_each_known_frame_type() {
        let types = [
            FrameType::StreamOpen,
            FrameType::StreamOpenAck,
            FrameType::StreamOpenErr,
            FrameType::StreamData,
            FrameType::StreamClose,
            FrameType::StreamReset,
            FrameType::RouteAdvertise,
            FrameType::RouteWithdraw,
            FrameType::NodeInfoAdvertise,
            FrameType::PeerHello,
            FrameType::PeerHelloAck,
            FrameType::Keepalive,
            FrameType::KeepaliveAck,
            FrameType::ControlRequest,
            FrameType::ControlResponse,
        ];
        for ft in types {
            let payload = Bytes::from_static(b"hello world");
            let stream_id = if ft.is_control() { 0 } else { 7 };
            let encoded = encode(ft, Flags::FIN_WRITE, stream_id, payload.clone()).unwrap();
            let (header, body, consumed) = decode(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(header.frame_type, ft);
            assert_eq!(header.stream_id, stream_id);
            assert!(header.flags.contains(Flags::FIN_WRITE));
            assert_eq!(body, payload.as_ref());
        }
    }

    #[test]
    fn unknown_frame_type_round_trips_as_unknown() {
        let encoded = encode(FrameType::Unknown(0x7f), Flags::empty(), 3, Bytes::new()).unwrap();
        let (header, _, _) = decode(&encoded).unwrap();
        assert_eq!(header.frame_type, FrameType::Unknown(0x7f));
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        let err = encode(FrameType::StreamData, Flags::empty(), 1, payload).unwrap_err();
        assert_eq!(err, EncodeError::FrameTooLarge(MAX_PAYLOAD_LEN + 1));
    }

    #[test]
    fn decoder_rejects_oversized_length_field() {
        let mut buf = BytesMut::new();
        buf.put_u8(FrameType::StreamData.code());
        buf.put_u8(0);
        buf.put_u32((MAX_PAYLOAD_LEN + 2) as u32);
        buf.put_u64(1);
        let err = decode(&buf).unwrap_err();
        assert_eq!(err, DecodeError::FrameTooLarge((MAX_PAYLOAD_LEN + 2) as u32));
    }

    #[test]
    fn decoder_reports_truncated_for_short_buffers() {
        assert_eq!(decode(&[0u8; 5]).unwrap_err(), DecodeError::Truncated);

        let full = encode(FrameType::Keepalive, Flags::empty(), 0, Bytes::from_static(b"abc")).unwrap();
        assert_eq!(decode(&full[..full.len() - 1]).unwrap_err(), DecodeError::Truncated);
    }

    #[test]
    fn streaming_decoder_handles_split_reads() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new(
            FrameType::StreamData,
            Flags::empty(),
            9,
            Bytes::from_static(b"chunked-payload"),
        );
        let mut full = BytesMut::new();
        encode_frame(&frame, &mut full).unwrap();

        let mut buf = BytesMut::new();
        // Feed one byte at a time; decode() must return None until complete.
        let mut decoded = None;
        for byte in full.iter() {
            buf.put_u8(*byte);
            if let Some(f) = codec.decode(&mut buf).unwrap() {
                decoded = Some(f);
                break;
            }
        }
        let decoded = decoded.expect("frame should decode once all bytes arrive");
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn streaming_decoder_handles_two_frames_in_one_buffer() {
        let mut codec = FrameCodec::new();
        let a = Frame::new(FrameType::StreamData, Flags::empty(), 1, Bytes::from_static(b"a"));
        let b = Frame::new(FrameType::StreamData, Flags::empty(), 3, Bytes::from_static(b"bb"));
        let mut buf = BytesMut::new();
        encode_frame(&a, &mut buf).unwrap();
        encode_frame(&b, &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
