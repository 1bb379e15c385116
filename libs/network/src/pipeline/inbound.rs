//! Inbound pipeline: one receive loop per connection
//!
//! The loop reads a frame header, then exactly `payload_length` bytes, and
//! decodes the message. A decoded message either fulfils the pending
//! response with its correlation id or goes to the unsolicited-message
//! dispatcher. Dispatch never blocks the loop.
//!
//! Corrupt frames are discarded and the loop keeps reading. Any
//! non-success socket status ends the loop.

use super::promises::PromiseTable;
use crate::metrics::ConnectionMetrics;
use crate::pool::Pools;
use crate::socket::{receive_exact, Socket, SocketStatus};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use strand_codec::{decode_payload, FrameHeader, Message, HEADER_SIZE};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Receives messages the pending-response table did not claim
pub type Dispatch = Arc<dyn Fn(Message) + Send + Sync>;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

enum FrameOutcome {
    Message(Message),
    Discarded,
    Closed(SocketStatus),
}

/// Receive side of one connection
pub struct InboundPipeline {
    socket: Arc<dyn Socket>,
    pools: Pools,
    promises: Arc<PromiseTable>,
    dispatch: Dispatch,
    metrics: Arc<ConnectionMetrics>,
    token: CancellationToken,
    state: AtomicU8,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InboundPipeline {
    pub fn new(
        socket: Arc<dyn Socket>,
        pools: Pools,
        promises: Arc<PromiseTable>,
        dispatch: Dispatch,
        metrics: Arc<ConnectionMetrics>,
        token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            pools,
            promises,
            dispatch,
            metrics,
            token,
            state: AtomicU8::new(IDLE),
            task: Mutex::new(None),
        })
    }

    /// Start the receive loop; no-op unless idle
    pub fn start(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let pipeline = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move { pipeline.run().await }));
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(&self) {
        self.state.store(STOPPED, Ordering::Release);
        self.token.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Inbound loop ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    async fn run(self: Arc<Self>) {
        let peer = self.socket.remote_addr();
        debug!(peer = ?peer, "Inbound loop started");

        let status = loop {
            if self.token.is_cancelled() || self.is_stopped() {
                break SocketStatus::OperationAborted;
            }
            match self.read_frame().await {
                FrameOutcome::Message(message) => self.deliver(message),
                FrameOutcome::Discarded => continue,
                FrameOutcome::Closed(status) => break status,
            }
        };

        self.state.store(STOPPED, Ordering::Release);
        debug!(peer = ?peer, %status, "Inbound loop exited");
    }

    /// Read one frame with a borrowed op and scratch buffer
    async fn read_frame(&self) -> FrameOutcome {
        let mut op = self.pools.take_op();

        let mut header = [0u8; HEADER_SIZE];
        let status = tokio::select! {
            _ = self.token.cancelled() => SocketStatus::OperationAborted,
            status = receive_exact(self.socket.as_ref(), &mut op, &mut header) => status,
        };
        if !status.is_success() {
            return FrameOutcome::Closed(status);
        }

        let Some(header) = FrameHeader::decode(&header) else {
            return FrameOutcome::Discarded;
        };
        let Some(length) = header.payload_len() else {
            warn!(
                op_code = header.op_code,
                payload_length = header.payload_length,
                "Discarding frame with invalid header"
            );
            self.metrics.record_discarded(HEADER_SIZE);
            return FrameOutcome::Discarded;
        };
        if length > self.pools.buffers().max_frame_size() {
            warn!(
                op_code = header.op_code,
                payload_length = header.payload_length,
                limit = self.pools.buffers().max_frame_size(),
                "Discarding frame header with oversized payload"
            );
            self.metrics.record_discarded(HEADER_SIZE);
            return FrameOutcome::Discarded;
        }

        let mut payload = self.pools.take_buffer(length);
        let status = tokio::select! {
            _ = self.token.cancelled() => SocketStatus::OperationAborted,
            status = receive_exact(self.socket.as_ref(), &mut op, &mut payload) => status,
        };
        if !status.is_success() {
            return FrameOutcome::Closed(status);
        }

        match decode_payload(header.op_code, &payload) {
            Ok(message) => {
                self.metrics.record_receive(HEADER_SIZE + length);
                FrameOutcome::Message(message)
            }
            Err(e) => {
                warn!(
                    op_code = header.op_code,
                    bytes = length,
                    error = %e,
                    "Discarding undecodable frame"
                );
                self.metrics.record_discarded(HEADER_SIZE + length);
                FrameOutcome::Discarded
            }
        }
    }

    fn deliver(&self, message: Message) {
        let correlation = message.correlation();
        let op_code = message.op_code();

        match self.promises.try_complete(message) {
            None => {
                self.metrics.record_fulfilled();
                trace!(%correlation, op_code, "Response matched pending request");
            }
            Some(message) => {
                self.metrics.record_unsolicited();
                trace!(%correlation, op_code, "Dispatching unsolicited message");
                (self.dispatch)(message);
            }
        }
    }
}

impl fmt::Debug for InboundPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            IDLE => "idle",
            RUNNING => "running",
            _ => "stopped",
        };
        f.debug_struct("InboundPipeline")
            .field("state", &state)
            .field("socket", &self.socket)
            .finish()
    }
}
