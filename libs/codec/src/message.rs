//! Application-level message model
//!
//! A [`Message`] is the unit that crosses the wire: an op code chosen by the
//! application, a 128-bit correlation id binding requests to responses, and
//! the serializer's string form of the payload. Messages are immutable once
//! built and live for exactly one encode or decode cycle.

use crate::error::Result;
use crate::serializer::Serializer;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identifier binding a request to its eventual response
pub type Correlation = Uuid;

/// Application message carried by one frame
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    correlation: Correlation,
    op_code: u32,
    content: String,
}

impl Message {
    /// Create a new message with a freshly generated correlation id
    pub fn new(op_code: u32, content: impl Into<String>) -> Self {
        Self::with_correlation(op_code, content, Uuid::new_v4())
    }

    /// Create a message bound to an existing correlation id
    pub fn with_correlation(
        op_code: u32,
        content: impl Into<String>,
        correlation: Correlation,
    ) -> Self {
        Self {
            correlation,
            op_code,
            content: content.into(),
        }
    }

    /// Create a response to `request`, copying its correlation id
    pub fn response_to(request: &Message, op_code: u32, content: impl Into<String>) -> Self {
        Self::with_correlation(op_code, content, request.correlation)
    }

    /// Serialize `value` with `serializer` and wrap it in a new message
    pub fn from_value(op_code: u32, value: &Value, serializer: &dyn Serializer) -> Result<Self> {
        Ok(Self::new(op_code, serializer.serialize(value)?))
    }

    /// Deserialize the content back into a value
    pub fn value(&self, serializer: &dyn Serializer) -> Result<Value> {
        serializer.deserialize(&self.content)
    }

    pub fn correlation(&self) -> Correlation {
        self.correlation
    }

    pub fn op_code(&self) -> u32 {
        self.op_code
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Consume the message, keeping only its content
    pub fn into_content(self) -> String {
        self.content
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("correlation", &self.correlation)
            .field("op_code", &self.op_code)
            .field("content_len", &self.content.len())
            .finish()
    }
}
