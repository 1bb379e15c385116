//! Length-prefixed string encoding
//!
//! ```text
//! ┌──────────────────────┬──────────────────┐
//! │ byte length (7-bit)  │ UTF-8 bytes      │
//! │ 1..=5 bytes, LEB128  │ length bytes     │
//! └──────────────────────┴──────────────────┘
//! ```
//!
//! Each prefix byte carries seven bits of the length, least significant group
//! first; the high bit marks a continuation byte.

use crate::error::{CodecError, Result};
use bytes::BufMut;

/// Longest prefix a 31-bit length can need
pub const MAX_PREFIX_LEN: usize = 5;

/// Number of prefix bytes needed for a string of `len` bytes
pub fn prefix_len(len: usize) -> usize {
    let mut value = len;
    let mut count = 1;
    while value >= 0x80 {
        value >>= 7;
        count += 1;
    }
    count
}

/// Total encoded size of `s` including its prefix
pub fn encoded_len(s: &str) -> usize {
    prefix_len(s.len()) + s.len()
}

/// Write `s` with its length prefix
pub fn put_prefixed_str<B: BufMut>(buf: &mut B, s: &str) {
    let mut value = s.len();
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
    buf.put_slice(s.as_bytes());
}

/// Read a length-prefixed string from the start of `buf`
///
/// Returns the string and the number of bytes consumed.
pub fn read_prefixed_str(buf: &[u8]) -> Result<(&str, usize)> {
    let mut len: u64 = 0;
    let mut shift = 0;
    let mut offset = 0;

    loop {
        if offset == MAX_PREFIX_LEN {
            return Err(CodecError::InvalidStringPrefix {
                offset,
                reason: "prefix longer than 5 bytes",
            });
        }
        let byte = *buf.get(offset).ok_or(CodecError::InvalidStringPrefix {
            offset,
            reason: "prefix truncated",
        })?;
        len |= u64::from(byte & 0x7F) << shift;
        offset += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    if len > i32::MAX as u64 {
        return Err(CodecError::InvalidStringPrefix {
            offset,
            reason: "length exceeds i32::MAX",
        });
    }

    let len = len as usize;
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or(CodecError::InvalidStringPrefix {
            offset,
            reason: "string overruns buffer",
        })?;

    let s = std::str::from_utf8(&buf[offset..end])?;
    Ok((s, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_len_boundaries() {
        assert_eq!(prefix_len(0), 1);
        assert_eq!(prefix_len(127), 1);
        assert_eq!(prefix_len(128), 2);
        assert_eq!(prefix_len(16_383), 2);
        assert_eq!(prefix_len(16_384), 3);
        assert_eq!(prefix_len(i32::MAX as usize), 5);
    }

    #[test]
    fn test_short_string_layout() {
        let mut buf = Vec::new();
        put_prefixed_str(&mut buf, "ping");
        assert_eq!(buf, vec![4, b'p', b'i', b'n', b'g']);
    }

    #[test]
    fn test_two_byte_prefix_layout() {
        let s = "x".repeat(300);
        let mut buf = Vec::new();
        put_prefixed_str(&mut buf, &s);
        // 300 = 0b10_0101100 -> 0xAC, 0x02
        assert_eq!(&buf[..2], &[0xAC, 0x02]);
        assert_eq!(buf.len(), encoded_len(&s));

        let (decoded, consumed) = read_prefixed_str(&buf).unwrap();
        assert_eq!(decoded, s);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_truncated_prefix() {
        let err = read_prefixed_str(&[0x80]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidStringPrefix { .. }));
    }

    #[test]
    fn test_overlong_prefix() {
        let err = read_prefixed_str(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidStringPrefix { offset: 5, .. }
        ));
    }

    #[test]
    fn test_length_overruns_buffer() {
        let err = read_prefixed_str(&[10, b'a', b'b']).unwrap_err();
        assert!(matches!(err, CodecError::InvalidStringPrefix { .. }));
    }

    #[test]
    fn test_invalid_utf8() {
        let err = read_prefixed_str(&[2, 0xC3, 0x28]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8(_)));
    }
}
