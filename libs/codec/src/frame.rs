//! Frame layout and encode/decode routines
//!
//! ```text
//! ┌──────────┬────────────────┬─────────────┬─────────────────────────┐
//! │ Op Code  │ Payload Length │ Correlation │ Content                 │
//! │ u32 LE   │ i32 LE         │ 16 bytes    │ length-prefixed UTF-8   │
//! └──────────┴────────────────┴─────────────┴─────────────────────────┘
//!  \_______ header ________/  \_____________ payload _______________/
//! ```
//!
//! Sections are contiguous. `payload_length` counts the correlation and the
//! encoded content. Fields are read and written one by one from byte slices;
//! nothing is reinterpreted in place.

use crate::error::{CodecError, Result};
use crate::message::Message;
use crate::string::{encoded_len, put_prefixed_str, read_prefixed_str};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Header size in bytes (op code + payload length)
pub const HEADER_SIZE: usize = 8;

/// Correlation id size in bytes
pub const CORRELATION_SIZE: usize = 16;

/// Largest payload the signed length field can describe
pub const MAX_PAYLOAD_LENGTH: usize = i32::MAX as usize;

/// Fixed-size prefix of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub op_code: u32,
    /// Byte count of correlation + content
    pub payload_length: i32,
}

impl FrameHeader {
    pub fn new(op_code: u32, payload_length: i32) -> Self {
        Self {
            op_code,
            payload_length,
        }
    }

    /// Encode to a fresh array
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.op_code);
        buf.put_i32_le(self.payload_length);
        out
    }

    /// Decode from the first `HEADER_SIZE` bytes of `buf`
    ///
    /// Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = &buf[..HEADER_SIZE];
        Some(Self {
            op_code: buf.get_u32_le(),
            payload_length: buf.get_i32_le(),
        })
    }

    /// Headers describing a zero or one byte payload are corrupt
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.payload_length > 1
    }

    /// Payload length as a buffer size, if the header is valid
    #[inline]
    pub fn payload_len(&self) -> Option<usize> {
        self.is_valid().then_some(self.payload_length as usize)
    }
}

/// Payload size of `message` once encoded
pub fn payload_len(message: &Message) -> Result<usize> {
    let len = CORRELATION_SIZE + encoded_len(message.content());
    if len > MAX_PAYLOAD_LENGTH {
        return Err(CodecError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_LENGTH,
        });
    }
    Ok(len)
}

/// Full frame size of `message` once encoded
pub fn frame_len(message: &Message) -> Result<usize> {
    Ok(HEADER_SIZE + payload_len(message)?)
}

/// Encode `message` into the front of `out`, returning the bytes written
pub fn encode_frame_into(message: &Message, out: &mut [u8]) -> Result<usize> {
    let payload = payload_len(message)?;
    let total = HEADER_SIZE + payload;
    if out.len() < total {
        return Err(CodecError::BufferTooSmall {
            need: total,
            got: out.len(),
            context: "frame encode",
        });
    }

    let mut buf = &mut out[..total];
    buf.put_slice(&FrameHeader::new(message.op_code(), payload as i32).encode());
    buf.put_slice(message.correlation().as_bytes());
    put_prefixed_str(&mut buf, message.content());
    debug_assert!(buf.is_empty());

    Ok(total)
}

/// Encode `message` into a new buffer
pub fn encode_frame(message: &Message) -> Result<Bytes> {
    let mut out = BytesMut::zeroed(frame_len(message)?);
    encode_frame_into(message, &mut out)?;
    Ok(out.freeze())
}

/// Rebuild a message from a frame payload (correlation + content)
pub fn decode_payload(op_code: u32, payload: &[u8]) -> Result<Message> {
    if payload.len() < CORRELATION_SIZE + 1 {
        return Err(CodecError::BufferTooSmall {
            need: CORRELATION_SIZE + 1,
            got: payload.len(),
            context: "frame payload",
        });
    }

    let mut correlation = [0u8; CORRELATION_SIZE];
    correlation.copy_from_slice(&payload[..CORRELATION_SIZE]);

    let body = &payload[CORRELATION_SIZE..];
    let (content, consumed) = read_prefixed_str(body)?;
    if consumed != body.len() {
        return Err(CodecError::TrailingBytes {
            remaining: body.len() - consumed,
        });
    }

    Ok(Message::with_correlation(
        op_code,
        content,
        Uuid::from_bytes(correlation),
    ))
}

/// Decode one complete frame from the start of `buf`
///
/// Returns the message and the number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<(Message, usize)> {
    let header = FrameHeader::decode(buf).ok_or(CodecError::BufferTooSmall {
        need: HEADER_SIZE,
        got: buf.len(),
        context: "frame header",
    })?;

    let payload = header
        .payload_len()
        .ok_or(CodecError::InvalidPayloadLength {
            length: header.payload_length,
            min: CORRELATION_SIZE,
        })?;

    let end = HEADER_SIZE + payload;
    if buf.len() < end {
        return Err(CodecError::BufferTooSmall {
            need: end,
            got: buf.len(),
            context: "frame payload",
        });
    }

    let message = decode_payload(header.op_code, &buf[HEADER_SIZE..end])?;
    Ok((message, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_little_endian_layout() {
        let bytes = FrameHeader::new(0x0102_0304, 0x0A0B_0C0D).encode();
        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(
            FrameHeader::decode(&bytes),
            Some(FrameHeader::new(0x0102_0304, 0x0A0B_0C0D))
        );
    }

    #[test]
    fn test_header_validity_threshold() {
        assert!(!FrameHeader::new(1, -5).is_valid());
        assert!(!FrameHeader::new(1, 0).is_valid());
        assert!(!FrameHeader::new(1, 1).is_valid());
        assert!(FrameHeader::new(1, 2).is_valid());
        assert_eq!(FrameHeader::new(1, 0).payload_len(), None);
    }

    #[test]
    fn test_decode_header_too_short() {
        assert!(FrameHeader::decode(&[0u8; HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn test_frame_is_contiguous() {
        let message = Message::new(1, "ping");
        let frame = encode_frame(&message).unwrap();

        // header, 16-byte correlation, 1-byte prefix, 4 content bytes
        assert_eq!(frame.len(), HEADER_SIZE + CORRELATION_SIZE + 1 + 4);

        let header = FrameHeader::decode(&frame).unwrap();
        assert_eq!(header.op_code, 1);
        assert_eq!(header.payload_length as usize, frame.len() - HEADER_SIZE);

        let correlation = &frame[HEADER_SIZE..HEADER_SIZE + CORRELATION_SIZE];
        assert_eq!(correlation, message.correlation().as_bytes());
        assert_eq!(frame[HEADER_SIZE + CORRELATION_SIZE], 4);
        assert_eq!(&frame[HEADER_SIZE + CORRELATION_SIZE + 1..], b"ping");
    }

    #[test]
    fn test_decode_frame_round_trip() {
        let message = Message::new(99, "héllo wörld");
        let frame = encode_frame(&message).unwrap();
        let (decoded, consumed) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_empty_content() {
        let message = Message::new(3, "");
        let frame = encode_frame(&message).unwrap();
        let (decoded, _) = decode_frame(&frame).unwrap();
        assert_eq!(decoded.content(), "");
    }

    #[test]
    fn test_encode_into_small_buffer() {
        let message = Message::new(1, "ping");
        let mut out = [0u8; 10];
        let err = encode_frame_into(&message, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_encode_into_larger_buffer_leaves_tail() {
        let message = Message::new(1, "ping");
        let mut out = vec![0xEE; 64];
        let written = encode_frame_into(&message, &mut out).unwrap();
        assert_eq!(written, frame_len(&message).unwrap());
        assert!(out[written..].iter().all(|b| *b == 0xEE));
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let err = decode_payload(1, &[0u8; 10]).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut payload = vec![0u8; CORRELATION_SIZE];
        payload.extend_from_slice(&[1, b'a', b'z']);
        let err = decode_payload(1, &payload).unwrap_err();
        assert_eq!(err, CodecError::TrailingBytes { remaining: 1 });
    }

    #[test]
    fn test_decode_frame_rejects_invalid_header() {
        let bytes = FrameHeader::new(1, 1).encode();
        let err = decode_frame(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::InvalidPayloadLength { length: 1, .. }));
    }
}
