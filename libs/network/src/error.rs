//! Transport Error Types
//!
//! Caller-facing failures of the transport. Loop-internal failures (socket
//! errors on an established connection, corrupt frames) never surface here;
//! the loops handle them locally and log.

use std::fmt;
use strand_codec::{CodecError, Correlation};
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection establishment failed
    #[error("Cannot connect to {host}:{port}: {reason}")]
    CannotConnect {
        host: String,
        port: u16,
        reason: String,
    },

    /// A promise for this correlation is already pending
    #[error("Duplicate promise: a response for correlation {correlation} is already awaited")]
    DuplicatePromise { correlation: Correlation },

    /// A pending response was cancelled before it arrived
    #[error("Response for correlation {correlation} was cancelled")]
    Cancelled { correlation: Correlation },

    /// Required argument missing or out of range
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// Operation attempted on a disposed object
    #[error("{object} has been disposed")]
    Disposed { object: &'static str },

    /// Operation not allowed in the current lifecycle state
    #[error("Cannot {operation} a connection in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Server is already listening
    #[error("Server is already listening")]
    AlreadyListening,

    /// Connection has no live socket
    #[error("Connection is not connected")]
    NotConnected,

    /// Outbound queue refused the message (shutting down or cancelled)
    #[error("Outbound queue is closed")]
    QueueClosed,

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Frame or payload codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a connection-establishment error
    pub fn cannot_connect(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self::CannotConnect {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Create a lifecycle-state error
    pub fn invalid_state(operation: &'static str, state: impl fmt::Debug) -> Self {
        Self::InvalidState {
            operation,
            state: format!("{:?}", state),
        }
    }

    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|f| f.to_string()),
        }
    }

    /// True for a cancelled pending response
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
