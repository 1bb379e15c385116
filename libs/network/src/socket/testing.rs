//! In-memory socket for deterministic pipeline tests

use super::{OpKind, OpResult, Socket, SocketOp, SocketStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use strand_codec::{decode_frame, encode_frame, Message};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Inbound {
    bytes: VecDeque<u8>,
    finished: bool,
}

/// Socket fed by test code and recording everything sent through it
#[derive(Debug)]
pub(crate) struct ScriptedSocket {
    inbound: Mutex<Inbound>,
    readable: Notify,
    sent: Mutex<Vec<u8>>,
    send_calls: AtomicUsize,
    failing_sends: AtomicUsize,
    max_write: Option<usize>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbound")
            .field("pending", &self.bytes.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl ScriptedSocket {
    pub(crate) fn new() -> Self {
        Self {
            inbound: Mutex::new(Inbound::default()),
            readable: Notify::new(),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            failing_sends: AtomicUsize::new(0),
            max_write: None,
            connected: AtomicBool::new(true),
            closed: CancellationToken::new(),
        }
    }

    /// Cap the bytes accepted by each send call
    pub(crate) fn with_max_write(mut self, max_write: usize) -> Self {
        self.max_write = Some(max_write);
        self
    }

    pub(crate) fn push_inbound(&self, bytes: &[u8]) {
        self.inbound.lock().bytes.extend(bytes.iter().copied());
        self.readable.notify_one();
    }

    pub(crate) fn push_frame(&self, message: &Message) {
        let frame = encode_frame(message).unwrap();
        self.push_inbound(&frame);
    }

    /// Peer shutdown: reads return zero bytes once drained
    pub(crate) fn finish_inbound(&self) {
        self.inbound.lock().finished = true;
        self.readable.notify_one();
    }

    /// Fail the next `count` send calls with a reset
    pub(crate) fn fail_next_sends(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<u8> {
        self.sent.lock().clone()
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Decode every complete frame written so far
    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        let sent = self.sent();
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < sent.len() {
            let (message, used) = decode_frame(&sent[offset..]).unwrap();
            messages.push(message);
            offset += used;
        }
        messages
    }

    async fn read_some(&self, buf: &mut [u8]) -> OpResult {
        loop {
            {
                let mut inbound = self.inbound.lock();
                if !inbound.bytes.is_empty() {
                    let n = buf.len().min(inbound.bytes.len());
                    for (slot, byte) in buf.iter_mut().zip(inbound.bytes.drain(..n)) {
                        *slot = byte;
                    }
                    return OpResult::new(SocketStatus::Success, n);
                }
                if inbound.finished {
                    return OpResult::new(SocketStatus::Success, 0);
                }
            }
            tokio::select! {
                _ = self.closed.cancelled() => {
                    return OpResult::status(SocketStatus::OperationAborted);
                }
                _ = self.readable.notified() => {}
            }
        }
    }

    fn write_some(&self, buf: &[u8]) -> OpResult {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.is_cancelled() {
            return OpResult::status(SocketStatus::OperationAborted);
        }
        let failing = self.failing_sends.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_sends.store(failing - 1, Ordering::SeqCst);
            return OpResult::status(SocketStatus::ConnectionReset);
        }
        let n = self.max_write.map_or(buf.len(), |max| max.min(buf.len()));
        self.sent.lock().extend_from_slice(&buf[..n]);
        OpResult::new(SocketStatus::Success, n)
    }
}

#[async_trait]
impl Socket for ScriptedSocket {
    async fn connect(&self, op: &mut SocketOp, _endpoint: SocketAddr) -> SocketStatus {
        self.connected.store(true, Ordering::SeqCst);
        op.run(OpKind::Connect, async { OpResult::status(SocketStatus::Success) })
            .await
    }

    async fn accept(&self, op: &mut SocketOp) -> SocketStatus {
        op.run(OpKind::Accept, async {
            self.closed.cancelled().await;
            OpResult::status(SocketStatus::OperationAborted)
        })
        .await
    }

    async fn receive(&self, op: &mut SocketOp, buf: &mut [u8]) -> SocketStatus {
        op.run(OpKind::Receive, self.read_some(buf)).await
    }

    async fn send(&self, op: &mut SocketOp, buf: &[u8]) -> SocketStatus {
        let result = self.write_some(buf);
        op.run(OpKind::Send, async move { result }).await
    }

    async fn disconnect(&self, op: &mut SocketOp) -> SocketStatus {
        self.connected.store(false, Ordering::SeqCst);
        self.finish_inbound();
        op.run(OpKind::Disconnect, async { OpResult::status(SocketStatus::Success) })
            .await
    }

    fn bind(&self, _endpoint: SocketAddr) -> io::Result<()> {
        Ok(())
    }

    fn listen(&self, _backlog: u32) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        self.finish_inbound();
        Ok(())
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();
    }

    fn set_no_delay(&self, _no_delay: bool) -> io::Result<()> {
        Ok(())
    }

    fn no_delay(&self) -> bool {
        true
    }

    fn set_blocking(&self, _blocking: bool) -> io::Result<()> {
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        false
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
