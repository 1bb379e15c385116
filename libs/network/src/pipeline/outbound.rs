//! Outbound pipeline: ordered send queue per connection
//!
//! Producers append to a FIFO queue. At most one send loop drains it; the
//! first enqueue that finds no loop running starts one. The loop encodes each
//! message into a pooled buffer and writes the whole frame before taking the
//! next, so frames hit the wire in submission order.
//!
//! ## Restart window
//!
//! The loop exits as soon as it finds the queue empty. A message enqueued
//! between that empty check and the loop clearing its running flag sees a
//! loop still marked running, so no new loop starts; it stays queued until
//! the next `enqueue` starts one. This window is accepted as-is.

use crate::metrics::ConnectionMetrics;
use crate::pool::Pools;
use crate::socket::{send_all, Socket};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strand_codec::{encode_frame_into, frame_len, Message};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Send side of one connection
pub struct OutboundPipeline {
    socket: Arc<dyn Socket>,
    pools: Pools,
    metrics: Arc<ConnectionMetrics>,
    token: CancellationToken,
    queue: Mutex<VecDeque<Message>>,
    running: AtomicBool,
    shutting_down: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OutboundPipeline {
    pub fn new(
        socket: Arc<dyn Socket>,
        pools: Pools,
        metrics: Arc<ConnectionMetrics>,
        token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            pools,
            metrics,
            token,
            queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Queue `message` for sending
    ///
    /// Returns `false` once the pipeline is shutting down or cancelled.
    pub fn enqueue(self: &Arc<Self>, message: Message) -> bool {
        // Held from the shutdown check through the spawn: `stop` flips the
        // flag under the same lock, so no loop can start after it took the
        // handle, and a racing enqueue cannot overwrite a newer handle
        let mut task = self.task.lock();
        if self.shutting_down.load(Ordering::Acquire) || self.token.is_cancelled() {
            return false;
        }

        self.queue.lock().push_back(message);
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let pipeline = Arc::clone(self);
            *task = Some(tokio::spawn(async move { pipeline.run().await }));
        }
        true
    }

    /// Stop accepting messages and wait for the send loop to exit
    ///
    /// With `finish_in_flight` the loop drains what is already queued;
    /// otherwise queued messages are discarded unsent.
    pub async fn stop(&self, finish_in_flight: bool) {
        let task = {
            let mut task = self.task.lock();
            self.shutting_down.store(true, Ordering::Release);
            task.take()
        };

        if !finish_in_flight {
            let discarded = {
                let mut queue = self.queue.lock();
                let count = queue.len();
                queue.clear();
                count
            };
            if discarded > 0 {
                debug!(discarded, "Discarded queued messages on stop");
            }
        }

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Send loop ended abnormally");
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.token.is_cancelled() {
                break;
            }
            let next = self.queue.lock().pop_front();
            let Some(message) = next else {
                break;
            };
            self.send_one(&message).await;
        }
        self.running.store(false, Ordering::Release);
    }

    /// Encode and write one frame; failures are logged and skipped
    async fn send_one(&self, message: &Message) {
        let length = match frame_len(message) {
            Ok(length) => length,
            Err(e) => {
                warn!(
                    correlation = %message.correlation(),
                    op_code = message.op_code(),
                    error = %e,
                    "Dropping unencodable message"
                );
                self.metrics.record_failed_send();
                return;
            }
        };

        let mut frame = self.pools.take_buffer(length);
        if let Err(e) = encode_frame_into(message, &mut frame) {
            warn!(correlation = %message.correlation(), error = %e, "Frame encoding failed");
            self.metrics.record_failed_send();
            return;
        }

        let mut op = self.pools.take_op();
        let status = send_all(self.socket.as_ref(), &mut op, &frame).await;
        if status.is_success() {
            self.metrics.record_send(length);
            trace!(
                correlation = %message.correlation(),
                op_code = message.op_code(),
                bytes = length,
                "Sent frame"
            );
        } else {
            self.metrics.record_failed_send();
            warn!(
                correlation = %message.correlation(),
                op_code = message.op_code(),
                %status,
                "Send failed"
            );
        }
    }
}

impl fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundPipeline")
            .field("queued", &self.queued())
            .field("running", &self.is_running())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::testing::ScriptedSocket;
    use std::time::Duration;

    fn pipeline(socket: Arc<ScriptedSocket>) -> (Arc<OutboundPipeline>, Pools, Arc<ConnectionMetrics>) {
        let pools = Pools::default();
        let metrics = Arc::new(ConnectionMetrics::new());
        let pipeline = OutboundPipeline::new(
            socket,
            pools.clone(),
            metrics.clone(),
            CancellationToken::new(),
        );
        (pipeline, pools, metrics)
    }

    #[tokio::test]
    async fn test_messages_sent_in_submission_order() {
        let socket = Arc::new(ScriptedSocket::new().with_max_write(5));
        let (pipeline, pools, metrics) = pipeline(socket.clone());

        for content in ["m1", "m2", "m3"] {
            assert!(pipeline.enqueue(Message::new(1, content)));
        }
        pipeline.stop(true).await;

        let sent: Vec<String> = socket
            .sent_messages()
            .into_iter()
            .map(Message::into_content)
            .collect();
        assert_eq!(sent, ["m1", "m2", "m3"]);
        assert_eq!(metrics.snapshot().messages_sent, 3);
        assert_eq!(pools.ops().outstanding(), 0);
        assert_eq!(pools.buffers().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_stop_without_finish_discards_queued_messages() {
        // Current-thread runtime: the spawned loop cannot run before `stop`
        let socket = Arc::new(ScriptedSocket::new());
        let (pipeline, _pools, metrics) = pipeline(socket.clone());

        for content in ["a", "b", "c"] {
            assert!(pipeline.enqueue(Message::new(7, content)));
        }
        assert_eq!(pipeline.queued(), 3);

        pipeline.stop(false).await;

        assert_eq!(socket.send_calls(), 0);
        assert!(socket.sent().is_empty());
        assert_eq!(metrics.snapshot().messages_sent, 0);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_enqueue_rejected_after_stop() {
        let socket = Arc::new(ScriptedSocket::new());
        let (pipeline, _pools, _metrics) = pipeline(socket);
        pipeline.stop(true).await;
        assert!(!pipeline.enqueue(Message::new(1, "late")));
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejected_after_cancellation() {
        let socket = Arc::new(ScriptedSocket::new());
        let token = CancellationToken::new();
        let pipeline = OutboundPipeline::new(
            socket,
            Pools::default(),
            Arc::new(ConnectionMetrics::new()),
            token.clone(),
        );
        token.cancel();
        assert!(!pipeline.enqueue(Message::new(1, "nope")));
    }

    #[tokio::test]
    async fn test_failed_send_does_not_block_later_messages() {
        let socket = Arc::new(ScriptedSocket::new());
        socket.fail_next_sends(1);
        let (pipeline, _pools, metrics) = pipeline(socket.clone());

        pipeline.enqueue(Message::new(1, "lost"));
        pipeline.enqueue(Message::new(1, "delivered"));
        pipeline.stop(true).await;

        let sent = socket.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content(), "delivered");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_sends, 1);
        assert_eq!(snapshot.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_loop_restarts_after_draining() {
        let socket = Arc::new(ScriptedSocket::new());
        let (pipeline, _pools, _metrics) = pipeline(socket.clone());

        pipeline.enqueue(Message::new(1, "first"));
        tokio::time::timeout(Duration::from_secs(2), async {
            while pipeline.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        pipeline.enqueue(Message::new(1, "second"));
        pipeline.stop(true).await;
        assert_eq!(socket.sent_messages().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_nothing_sent_after_stop_returns() {
        let socket = Arc::new(ScriptedSocket::new());
        let (pipeline, _pools, _metrics) = pipeline(socket.clone());

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    while pipeline.enqueue(Message::new(1, "spam")) {
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.stop(false).await;
        let calls_at_stop = socket.send_calls();

        for producer in producers {
            producer.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(socket.send_calls(), calls_at_stop);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_stop_with_no_loop_completes_immediately() {
        let socket = Arc::new(ScriptedSocket::new());
        let (pipeline, _pools, _metrics) = pipeline(socket);
        tokio::time::timeout(Duration::from_millis(100), pipeline.stop(false))
            .await
            .unwrap();
    }
}
