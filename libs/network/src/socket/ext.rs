//! Full-buffer transfers built from partial socket operations

use super::{Socket, SocketOp, SocketStatus};

/// Receive until `buf` is full
///
/// Returns [`SocketStatus::Shutdown`] if the peer closes before the buffer
/// fills. The op's byte count holds the last partial transfer only.
pub async fn receive_exact(
    socket: &dyn Socket,
    op: &mut SocketOp,
    buf: &mut [u8],
) -> SocketStatus {
    let mut filled = 0;
    while filled < buf.len() {
        let status = socket.receive(op, &mut buf[filled..]).await;
        if !status.is_success() {
            return status;
        }
        match op.bytes_transferred() {
            0 => return SocketStatus::Shutdown,
            n => filled += n,
        }
    }
    SocketStatus::Success
}

/// Send until every byte of `buf` is written
pub async fn send_all(socket: &dyn Socket, op: &mut SocketOp, buf: &[u8]) -> SocketStatus {
    let mut written = 0;
    while written < buf.len() {
        let status = socket.send(op, &buf[written..]).await;
        if !status.is_success() {
            return status;
        }
        match op.bytes_transferred() {
            0 => return SocketStatus::ConnectionAborted,
            n => written += n,
        }
    }
    SocketStatus::Success
}
