//! # Socket Abstraction
//!
//! The minimal capability set the pipelines need from a stream transport.
//! Every async operation borrows a [`SocketOp`] exclusively, reports a
//! [`SocketStatus`], and leaves the byte count (or the accepted socket) on
//! the op for the caller to read.
//!
//! Sockets use interior mutability so one socket can be shared between a
//! connection's receive loop and its send loop.
//!
//! ## Implementations
//! - [`TcpSocket`]: tokio TCP, non-blocking at the OS level

pub mod completion;
mod ext;
pub mod op;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testing;

pub use completion::{OpCompleter, OpCompletion};
pub use ext::{receive_exact, send_all};
pub use op::{OpResult, SocketOp};
pub use tcp::TcpSocket;

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Outcome code of a socket operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    Success,
    /// Peer closed its side; zero bytes were read
    Shutdown,
    ConnectionReset,
    ConnectionAborted,
    /// The operation was cancelled or its socket closed underneath it
    OperationAborted,
    NotConnected,
    ConnectionRefused,
    TimedOut,
    AddressInUse,
    InvalidArgument,
    /// The op handle was disposed
    Disposed,
    Other(io::ErrorKind),
}

impl SocketStatus {
    pub fn is_success(self) -> bool {
        self == SocketStatus::Success
    }

    /// Reset-type failures a listener skips over
    pub fn is_reset(self) -> bool {
        matches!(
            self,
            SocketStatus::ConnectionReset | SocketStatus::ConnectionAborted
        )
    }
}

impl From<&io::Error> for SocketStatus {
    fn from(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
                SocketStatus::ConnectionReset
            }
            io::ErrorKind::ConnectionAborted => SocketStatus::ConnectionAborted,
            io::ErrorKind::NotConnected => SocketStatus::NotConnected,
            io::ErrorKind::ConnectionRefused => SocketStatus::ConnectionRefused,
            io::ErrorKind::TimedOut => SocketStatus::TimedOut,
            io::ErrorKind::AddrInUse => SocketStatus::AddressInUse,
            io::ErrorKind::InvalidInput => SocketStatus::InvalidArgument,
            io::ErrorKind::UnexpectedEof => SocketStatus::Shutdown,
            kind => SocketStatus::Other(kind),
        }
    }
}

impl fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketStatus::Success => f.write_str("success"),
            SocketStatus::Shutdown => f.write_str("peer shut down the connection"),
            SocketStatus::ConnectionReset => f.write_str("connection reset"),
            SocketStatus::ConnectionAborted => f.write_str("connection aborted"),
            SocketStatus::OperationAborted => f.write_str("operation aborted"),
            SocketStatus::NotConnected => f.write_str("not connected"),
            SocketStatus::ConnectionRefused => f.write_str("connection refused"),
            SocketStatus::TimedOut => f.write_str("timed out"),
            SocketStatus::AddressInUse => f.write_str("address in use"),
            SocketStatus::InvalidArgument => f.write_str("invalid argument"),
            SocketStatus::Disposed => f.write_str("operation handle disposed"),
            SocketStatus::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// Kind of operation a [`SocketOp`] last carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    None,
    Connect,
    Accept,
    Receive,
    Send,
    Disconnect,
}

/// Stream socket capabilities required by connections and servers
#[async_trait]
pub trait Socket: Send + Sync + fmt::Debug {
    /// Connect to `endpoint`
    async fn connect(&self, op: &mut SocketOp, endpoint: SocketAddr) -> SocketStatus;

    /// Accept one client; the new socket is left on the op
    async fn accept(&self, op: &mut SocketOp) -> SocketStatus;

    /// Receive at most `buf.len()` bytes. Zero bytes means the peer shut down.
    async fn receive(&self, op: &mut SocketOp, buf: &mut [u8]) -> SocketStatus;

    /// Send a prefix of `buf`
    async fn send(&self, op: &mut SocketOp, buf: &[u8]) -> SocketStatus;

    /// Gracefully end the connection, aborting in-flight operations
    async fn disconnect(&self, op: &mut SocketOp) -> SocketStatus;

    fn bind(&self, endpoint: SocketAddr) -> io::Result<()>;

    fn listen(&self, backlog: u32) -> io::Result<()>;

    /// Shut down both directions of a connected socket
    fn shutdown(&self) -> io::Result<()>;

    /// Release the socket; pending operations complete as aborted
    fn close(&self);

    fn set_no_delay(&self, no_delay: bool) -> io::Result<()>;

    fn no_delay(&self) -> bool;

    fn set_blocking(&self, blocking: bool) -> io::Result<()>;

    fn is_blocking(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;

    fn is_connected(&self) -> bool;
}
