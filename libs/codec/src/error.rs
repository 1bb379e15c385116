//! Codec-level errors for frame encoding and decoding
//!
//! Every variant carries enough context to tell a truncated read apart from a
//! corrupted stream when it shows up in logs.

use thiserror::Error;

/// Frame and payload codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer is too small to contain the expected structure
    #[error("Buffer too small: need {need} bytes, got {got} (context: {context})")]
    BufferTooSmall {
        need: usize,
        got: usize,
        context: &'static str,
    },

    /// Header announced a payload that cannot hold a correlation id and content
    #[error("Invalid payload length {length}: frame payload must hold a {min}-byte correlation plus content")]
    InvalidPayloadLength { length: i32, min: usize },

    /// Length prefix of the content string is malformed or overruns the payload
    #[error("Invalid string prefix at offset {offset}: {reason}")]
    InvalidStringPrefix { offset: usize, reason: &'static str },

    /// Content bytes were not valid UTF-8
    #[error("Content is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Trailing bytes after the content string
    #[error("Unexpected {remaining} trailing bytes after content")]
    TrailingBytes { remaining: usize },

    /// Encoded payload does not fit the signed 32-bit length field
    #[error("Payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Payload serializer failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = CodecError::BufferTooSmall {
            need: 8,
            got: 3,
            context: "frame header",
        };
        let text = err.to_string();
        assert!(text.contains("need 8"));
        assert!(text.contains("frame header"));

        let err = CodecError::InvalidPayloadLength { length: 4, min: 16 };
        assert!(err.to_string().contains("16-byte correlation"));
    }
}
