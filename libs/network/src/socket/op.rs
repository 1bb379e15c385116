//! Reusable socket operation handle
//!
//! A [`SocketOp`] carries one in-flight socket operation: its kind, the
//! completion slot the socket publishes into, and the outcome (status, bytes
//! transferred, accepted socket). Handles come from the op pool and are
//! reset between borrowers.

use super::completion::{OpCompleter, OpCompletion};
use super::{OpKind, Socket, SocketStatus};
use crate::pool::Recycle;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Outcome published by a socket for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpResult {
    pub status: SocketStatus,
    pub bytes_transferred: usize,
}

impl OpResult {
    pub fn new(status: SocketStatus, bytes_transferred: usize) -> Self {
        Self {
            status,
            bytes_transferred,
        }
    }

    pub fn status(status: SocketStatus) -> Self {
        Self::new(status, 0)
    }
}

/// Handle for one pending connect, accept, receive, send or disconnect
pub struct SocketOp {
    kind: OpKind,
    status: SocketStatus,
    bytes_transferred: usize,
    accepted: Option<Arc<dyn Socket>>,
    completion: OpCompletion<OpResult>,
    disposed: bool,
}

impl SocketOp {
    pub fn new() -> Self {
        Self {
            kind: OpKind::None,
            status: SocketStatus::Success,
            bytes_transferred: 0,
            accepted: None,
            completion: OpCompletion::new(),
            disposed: false,
        }
    }

    /// Arm the handle for a new operation
    ///
    /// Returns the completer the socket publishes the outcome through, or
    /// `None` if the handle has been disposed.
    pub fn begin(&mut self, kind: OpKind) -> Option<OpCompleter<OpResult>> {
        if self.disposed {
            self.record(kind, SocketStatus::Disposed, 0);
            return None;
        }
        self.completion.reset();
        self.kind = kind;
        self.status = SocketStatus::Success;
        self.bytes_transferred = 0;
        Some(self.completion.completer())
    }

    /// Suspend until the armed operation completes
    ///
    /// Returns at once if the socket already completed synchronously. A
    /// completer dropped without completing reads as an aborted operation.
    pub async fn await_completion(&mut self) -> SocketStatus {
        let result = self
            .completion
            .wait()
            .await
            .unwrap_or(OpResult::status(SocketStatus::OperationAborted));
        self.status = result.status;
        self.bytes_transferred = result.bytes_transferred;
        self.status
    }

    /// Arm, drive `io` to its result, publish it and collect it
    ///
    /// Socket implementations whose I/O completes inside the calling task
    /// use this; `io` is not polled when the handle is disposed.
    pub async fn run<F>(&mut self, kind: OpKind, io: F) -> SocketStatus
    where
        F: Future<Output = OpResult>,
    {
        let Some(completer) = self.begin(kind) else {
            return SocketStatus::Disposed;
        };
        completer.complete(io.await);
        self.await_completion().await
    }

    /// Record an outcome without going through the completion slot
    pub fn record(&mut self, kind: OpKind, status: SocketStatus, bytes_transferred: usize) {
        self.kind = kind;
        self.status = status;
        self.bytes_transferred = bytes_transferred;
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn status(&self) -> SocketStatus {
        self.status
    }

    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }

    pub fn set_accepted(&mut self, socket: Arc<dyn Socket>) {
        self.accepted = Some(socket);
    }

    /// Take the socket produced by a successful accept
    pub fn take_accepted(&mut self) -> Option<Arc<dyn Socket>> {
        self.accepted.take()
    }

    /// Clear prior completion state for reuse
    pub fn reset(&mut self) {
        self.kind = OpKind::None;
        self.status = SocketStatus::Success;
        self.bytes_transferred = 0;
        self.accepted = None;
        self.completion.reset();
    }

    /// Release held resources; later operations complete as disposed
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(socket) = self.accepted.take() {
            socket.close();
        }
        self.completion.reset();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Default for SocketOp {
    fn default() -> Self {
        Self::new()
    }
}

impl Recycle for SocketOp {
    fn recycle(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.reset();
        true
    }
}

impl fmt::Debug for SocketOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOp")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("bytes_transferred", &self.bytes_transferred)
            .field("accepted", &self.accepted.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_synchronous_completion() {
        let mut op = SocketOp::new();
        let status = op
            .run(OpKind::Send, async { OpResult::new(SocketStatus::Success, 42) })
            .await;
        assert_eq!(status, SocketStatus::Success);
        assert_eq!(op.kind(), OpKind::Send);
        assert_eq!(op.bytes_transferred(), 42);
    }

    #[tokio::test]
    async fn test_completion_from_callback_task() {
        let mut op = SocketOp::new();
        let completer = op.begin(OpKind::Receive).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            completer.complete(OpResult::new(SocketStatus::Success, 8));
        });
        assert_eq!(op.await_completion().await, SocketStatus::Success);
        assert_eq!(op.bytes_transferred(), 8);
    }

    #[tokio::test]
    async fn test_abandoned_operation_reads_as_aborted() {
        let mut op = SocketOp::new();
        let completer = op.begin(OpKind::Accept).unwrap();
        drop(completer);
        assert_eq!(op.await_completion().await, SocketStatus::OperationAborted);
    }

    #[tokio::test]
    async fn test_disposed_op_completes_as_disposed() {
        let mut op = SocketOp::new();
        op.dispose();
        op.dispose();
        assert!(op.is_disposed());

        let polled = std::sync::atomic::AtomicBool::new(false);
        let status = op
            .run(OpKind::Receive, async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                OpResult::status(SocketStatus::Success)
            })
            .await;
        assert_eq!(status, SocketStatus::Disposed);
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(op.status(), SocketStatus::Disposed);
        assert!(!op.recycle());
    }

    #[test]
    fn test_reset_clears_outcome() {
        let mut op = SocketOp::new();
        op.record(OpKind::Receive, SocketStatus::ConnectionReset, 3);
        assert!(op.recycle());
        assert_eq!(op.kind(), OpKind::None);
        assert_eq!(op.status(), SocketStatus::Success);
        assert_eq!(op.bytes_transferred(), 0);
        assert!(op.take_accepted().is_none());
    }
}
