//! Payload serializer collaborator
//!
//! The transport never looks inside message content. Applications turn their
//! values into the content string through a [`Serializer`]; the JSON
//! implementation is the default.

use crate::error::Result;
use serde_json::Value;

/// Converts application values to and from message content strings
pub trait Serializer: Send + Sync {
    /// Serialize a value; `Value::Null` yields an empty string
    fn serialize(&self, value: &Value) -> Result<String>;

    /// Deserialize content; empty or blank input yields `Value::Null`
    fn deserialize(&self, content: &str) -> Result<Value>;
}

/// JSON serializer backed by `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        if value.is_null() {
            return Ok(String::new());
        }
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, content: &str) -> Result<Value> {
        if content.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(content)?)
    }
}
