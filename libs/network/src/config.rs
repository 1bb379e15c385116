//! # Transport Configuration
//!
//! Tunables for pools, connections and servers, loadable from TOML:
//!
//! ```toml
//! [pool]
//! max_buffer_size = 3145728     # larger frames use one-off allocations
//! max_pool_bytes = 104857600    # cap on bytes retained by the buffer pool
//! max_idle_ops = 256            # idle socket operations kept for reuse
//! max_frame_size = 67108864     # larger announced payloads are discarded as corrupt
//!
//! [connection]
//! connect_timeout_ms = 10000
//! no_delay = true
//!
//! [server]
//! backlog = 5000
//! no_delay = true
//! ```
//!
//! Every section is optional; missing sections and fields take their defaults.

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default largest pooled buffer (3 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 3 * 1024 * 1024;

/// Default cap on bytes retained by the buffer pool (100 MiB)
pub const DEFAULT_MAX_POOL_BYTES: usize = 100 * 1024 * 1024;

/// Default number of idle socket operations kept
pub const DEFAULT_MAX_IDLE_OPS: usize = 256;

/// Default largest payload a frame header may announce (64 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 5000;

/// Aggregated transport configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub pool: PoolConfig,
    pub connection: ConnectionConfig,
    pub server: ServerConfig,
}

/// Pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Largest buffer served from the pool
    pub max_buffer_size: usize,
    /// Total bytes the buffer pool may retain while idle
    pub max_pool_bytes: usize,
    /// Idle socket operations kept for reuse
    pub max_idle_ops: usize,
    /// Largest payload accepted from a frame header
    pub max_frame_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_pool_bytes: DEFAULT_MAX_POOL_BYTES,
            max_idle_ops: DEFAULT_MAX_IDLE_OPS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Client connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Disable Nagle coalescing on connected sockets
    pub no_delay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            no_delay: true,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Listening server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen backlog
    pub backlog: u32,
    /// Disable Nagle coalescing on accepted sockets
    pub no_delay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            no_delay: true,
        }
    }
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TransportError::io(format!("Failed to read config file {}", path.display()), e)
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            TransportError::configuration(format!("Failed to parse config: {}", e), None)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;

        if self.connection.connect_timeout_ms == 0 {
            return Err(TransportError::configuration(
                "connect_timeout_ms must be > 0",
                Some("connection.connect_timeout_ms"),
            ));
        }

        if self.server.backlog == 0 {
            return Err(TransportError::configuration(
                "backlog must be > 0",
                Some("server.backlog"),
            ));
        }

        Ok(())
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_size == 0 {
            return Err(TransportError::configuration(
                "max_buffer_size must be > 0",
                Some("pool.max_buffer_size"),
            ));
        }

        if self.max_pool_bytes < self.max_buffer_size {
            return Err(TransportError::configuration(
                "max_pool_bytes must be >= max_buffer_size",
                Some("pool.max_pool_bytes"),
            ));
        }

        if self.max_frame_size < self.max_buffer_size {
            return Err(TransportError::configuration(
                "max_frame_size must be >= max_buffer_size",
                Some("pool.max_frame_size"),
            ));
        }

        Ok(())
    }
}
