//! Frame-level codec: `[len:u32 LE][type:u8][payload]`.
//!
//! `len` counts the type byte plus payload and must fall in `[1, 16 MiB]`.
//! Exposes both a buffer-oriented pair (`encode_frame`/`decode_frame`, used
//! directly by unit tests and anywhere a whole frame is already in memory)
//! and a `tokio_util::codec::{Encoder, Decoder}` implementation so a
//! `PeerConnection` can drive a `Framed` stream over a socket.

use tokio_util::codec::{Decoder, Encoder};

use crate::error::{NetworkError, NetworkResult};
use crate::protocol::{Message, MessageType, MAX_PAYLOAD_SIZE};

const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message into a complete frame: length prefix, type byte, payload.
pub fn encode_frame(msg: &Message) -> Vec<u8> {
    let payload = msg.payload();
    let body_len = 1 + payload.len();
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.push(msg.message_type().as_byte());
    out.extend_from_slice(payload);
    out
}

/// Attempt to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet contain a complete frame.
/// Returns `Ok(Some((message, consumed)))` on success, where `consumed` is
/// the number of bytes of `buf` the frame occupied.
pub fn decode_frame(buf: &[u8]) -> NetworkResult<Option<(Message, usize)>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let body_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if body_len == 0 || body_len > MAX_PAYLOAD_SIZE + 1 {
        return Err(NetworkError::MalformedFrame(format!(
            "frame length {body_len} out of range"
        )));
    }
    let total_len = LENGTH_PREFIX_SIZE + body_len;
    if buf.len() < total_len {
        return Ok(None);
    }
    let type_byte = buf[LENGTH_PREFIX_SIZE];
    let ty = MessageType::from_byte(type_byte)
        .ok_or(NetworkError::UnknownMessageType(type_byte))?;
    let payload = &buf[LENGTH_PREFIX_SIZE + 1..total_len];
    let message = Message::deserialize(ty, payload)?;
    Ok(Some((message, total_len)))
}

/// `tokio_util` codec adapter for use with `Framed<TcpStream, FrameCodec>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Encoder<Message> for FrameCodec {
    type Error = NetworkError;

    fn encode(
        &mut self,
        item: Message,
        dst: &mut bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        dst.extend_from_slice(&encode_frame(&item));
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_frame(src)? {
            Some((msg, consumed)) => {
                let _ = src.split_to(consumed);
                Ok(Some(msg))
            }
            None => {
                if src.len() >= LENGTH_PREFIX_SIZE {
                    let body_len = u32::from_le_bytes(src[0..4].try_into().unwrap()) as usize;
                    if body_len == 0 || body_len > MAX_PAYLOAD_SIZE + 1 {
                        return Err(NetworkError::MalformedFrame(format!(
                            "frame length {body_len} out of range"
                        )));
                    }
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::PingPong;

    #[test]
    fn s1_framing_round_trip() {
        let msg = Message::ping(PingPong::new(0x0102030405060708, 0));
        let frame = encode_frame(&msg);
        assert_eq!(
            frame,
            vec![
                0x11, 0x00, 0x00, 0x00, 0x04, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
        let (decoded, consumed) = decode_frame(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn s2_unknown_type_is_rejected() {
        let buf = [0x01u8, 0x00, 0x00, 0x00, 0x7F];
        let err = decode_frame(&buf).unwrap_err();
        assert!(matches!(err, NetworkError::UnknownMessageType(0x7F)));
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let msg = Message::ping(PingPong::new(1, 2));
        let frame = encode_frame(&msg);
        assert_eq!(decode_frame(&frame[..frame.len() - 1]).unwrap(), None);
        assert_eq!(decode_frame(&frame[..2]).unwrap(), None);
    }

    #[test]
    fn oversized_frame_length_is_malformed() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_PAYLOAD_SIZE as u32) + 100).to_le_bytes());
        buf.push(0x04);
        let err = decode_frame(&buf).unwrap_err();
        assert!(matches!(err, NetworkError::MalformedFrame(_)));
    }
}
