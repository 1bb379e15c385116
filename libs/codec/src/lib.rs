//! # Strand Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the Strand transport: everything that decides what the
//! bytes on the wire look like, and nothing that touches a socket.
//!
//! - [`Message`]: op code + correlation id + content string
//! - [`FrameHeader`] and the frame encode/decode routines
//! - The length-prefixed string encoding used for content
//! - The [`Serializer`] collaborator that maps application values to content
//!
//! ## Architecture Role
//!
//! ```text
//! application values → [Serializer] → Message → [frame codec] → bytes → network/
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket handling, pooling or pipelines (belongs in `strand-network`)
//! - Any interpretation of message content

pub mod error;
pub mod frame;
pub mod message;
pub mod serializer;
pub mod string;

pub use error::{CodecError, Result};
pub use frame::{
    decode_frame, decode_payload, encode_frame, encode_frame_into, frame_len, payload_len,
    FrameHeader, CORRELATION_SIZE, HEADER_SIZE, MAX_PAYLOAD_LENGTH,
};
pub use message::{Correlation, Message};
pub use serializer::{JsonSerializer, Serializer};
