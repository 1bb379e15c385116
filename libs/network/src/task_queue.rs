//! Sequential task queue
//!
//! Runs submitted async actions one at a time in submission order. Each
//! action is spawned as a continuation that first awaits the task before it,
//! so the queue itself never blocks the caller. Actions receive the queue's
//! cancellation token and are expected to check it cooperatively.

use crate::error::{Result, TransportError};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Default)]
struct Chain {
    tail: Option<JoinHandle<()>>,
    stopped: bool,
    submitted: u64,
}

/// Ordered executor for side-effecting callbacks
#[derive(Default)]
pub struct TaskQueue {
    chain: Mutex<Chain>,
    token: CancellationToken,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `action` to the chain; `false` once the queue is stopped
    pub fn enqueue<F, Fut>(&self, action: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut chain = self.chain.lock();
        if chain.stopped {
            return false;
        }

        let previous = chain.tail.take();
        let token = self.token.clone();
        let sequence = chain.submitted;
        chain.submitted += 1;

        chain.tail = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    warn!(error = %e, "Queued action failed");
                }
            }
            action(token).await;
            debug!(sequence, "Queued action finished");
        }));
        true
    }

    /// Stop accepting actions and wait for the chain to drain
    ///
    /// Unless `finish_in_progress` is set, the shared token is cancelled
    /// first so running and queued actions can bail out early. Fails if the
    /// queue was already stopped.
    pub async fn stop(&self, finish_in_progress: bool) -> Result<()> {
        let tail = {
            let mut chain = self.chain.lock();
            if chain.stopped {
                return Err(TransportError::Disposed {
                    object: "TaskQueue",
                });
            }
            chain.stopped = true;
            chain.tail.take()
        };

        if !finish_in_progress {
            self.token.cancel();
        }
        if let Some(tail) = tail {
            if let Err(e) = tail.await {
                warn!(error = %e, "Queued action failed");
            }
        }
        self.token.cancel();
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.chain.lock().stopped
    }

    /// Token handed to every action
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = self.chain.lock();
        f.debug_struct("TaskQueue")
            .field("submitted", &chain.submitted)
            .field("stopped", &chain.stopped)
            .finish()
    }
}
