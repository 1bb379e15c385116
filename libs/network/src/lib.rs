//! # Strand Network
//!
//! ## Purpose
//!
//! Point-to-point message transport over stream sockets. Turns a byte stream
//! into correlated [`Message`]s and runs many such connections concurrently
//! inside a server or a client.
//!
//! ## Architecture Role
//!
//! ```text
//! Server ──accept──▶ Connection::set_socket
//!                        │
//!                        ├── InboundPipeline ──▶ PromiseTable / MessageHandler
//!                        └── OutboundPipeline ◀── send_message
//!
//! every socket step borrows a SocketOp and a buffer from Pools
//! ```
//!
//! ## Modules
//!
//! - [`socket`]: socket capability trait, reusable operation handles, tokio TCP
//! - [`pool`]: object and buffer pools, bundled as [`Pools`]
//! - [`pipeline`]: receive loop, send queue, pending-response table
//! - [`connection`] / [`server`]: lifecycle wiring
//! - [`task_queue`]: ordered executor for side-effecting callbacks
//!
//! Wire format and the message model live in `strand-codec` and are
//! re-exported here.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod server;
pub mod socket;
pub mod task_queue;

pub use config::{ConnectionConfig, NetworkConfig, PoolConfig, ServerConfig};
pub use connection::{
    Connection, ConnectionBuilder, ConnectionContext, ConnectionState, MessageHandler,
};
pub use error::{Result, TransportError};
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use pipeline::{InboundPipeline, OutboundPipeline, PendingResponse, PromiseTable};
pub use pool::{BufferPool, ObjectPool, Pooled, PooledBuffer, Pools, Recycle};
pub use server::Server;
pub use socket::{OpKind, Socket, SocketOp, SocketStatus, TcpSocket};
pub use task_queue::TaskQueue;

pub use strand_codec::{Correlation, JsonSerializer, Message, Serializer};
