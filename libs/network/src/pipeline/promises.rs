//! Pending response table
//!
//! Maps a correlation id to the caller awaiting that response. Each entry
//! resolves exactly once: the inbound loop fulfils it, or cancellation (a
//! token firing, the waiter going away, or connection teardown) removes it.
//!
//! Registration attaches a listener to the cancellation token that drops the
//! entry as soon as the token fires, so a response arriving afterwards is
//! handed back as unsolicited instead of resolving a cancelled waiter.

use crate::error::{Result, TransportError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use strand_codec::{Correlation, Message};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Pending {
    ticket: u64,
    sender: Option<oneshot::Sender<Message>>,
    cancellation: CancellationToken,
    /// Fired when the entry leaves the table; ends the cancellation listener
    settled: CancellationToken,
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.settled.cancel();
    }
}

/// Concurrent correlation → waiter map
#[derive(Default)]
pub struct PromiseTable {
    entries: DashMap<Correlation, Pending>,
    next_ticket: AtomicU64,
}

impl PromiseTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for `correlation`
    ///
    /// Fails if a waiter for the same correlation is still pending. The
    /// returned handle resolves as cancelled once `cancellation` fires.
    pub fn register(
        self: &Arc<Self>,
        correlation: Correlation,
        cancellation: CancellationToken,
    ) -> Result<PendingResponse> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let settled = CancellationToken::new();

        match self.entries.entry(correlation) {
            Entry::Occupied(_) => return Err(TransportError::DuplicatePromise { correlation }),
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    ticket,
                    sender: Some(sender),
                    cancellation: cancellation.clone(),
                    settled: settled.clone(),
                });
            }
        }

        if cancellation.is_cancelled() {
            self.forget(correlation, ticket);
        } else if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(listen_for_cancellation(
                Arc::downgrade(self),
                correlation,
                ticket,
                cancellation.clone(),
                settled,
            ));
        }

        Ok(PendingResponse {
            correlation,
            ticket,
            receiver: Some(receiver),
            cancellation,
            table: Arc::clone(self),
        })
    }

    /// Fulfil the waiter for the message's correlation
    ///
    /// Hands the message back if nobody is waiting for it, including a
    /// waiter whose token has already fired.
    pub fn try_complete(&self, message: Message) -> Option<Message> {
        let correlation = message.correlation();
        match self.entries.remove(&correlation) {
            Some((_, mut pending)) if !pending.cancellation.is_cancelled() => {
                match pending.sender.take() {
                    Some(sender) => sender.send(message).err(),
                    None => Some(message),
                }
            }
            _ => Some(message),
        }
    }

    /// Fulfil the waiter for `correlation`; `false` if none was pending
    pub fn complete(&self, message: Message) -> bool {
        self.try_complete(message).is_none()
    }

    /// Cancel the waiter for `correlation`; `false` if none was pending
    pub fn cancel(&self, correlation: Correlation) -> bool {
        self.entries.remove(&correlation).is_some()
    }

    /// Cancel every pending waiter
    pub fn cancel_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            debug!(count, "Cancelled pending responses");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, correlation: &Correlation) -> bool {
        self.entries.contains_key(correlation)
    }

    fn forget(&self, correlation: Correlation, ticket: u64) {
        self.entries
            .remove_if(&correlation, |_, pending| pending.ticket == ticket);
    }
}

impl fmt::Debug for PromiseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseTable")
            .field("pending", &self.entries.len())
            .finish()
    }
}

/// Handle held by a caller awaiting one response
#[must_use = "dropping a PendingResponse cancels it"]
pub struct PendingResponse {
    correlation: Correlation,
    ticket: u64,
    receiver: Option<oneshot::Receiver<Message>>,
    cancellation: CancellationToken,
    table: Arc<PromiseTable>,
}

impl PendingResponse {
    pub fn correlation(&self) -> Correlation {
        self.correlation
    }

    /// Wait for the response or for cancellation
    pub async fn wait(mut self) -> Result<Message> {
        let correlation = self.correlation;
        let Some(receiver) = self.receiver.take() else {
            return Err(TransportError::Cancelled { correlation });
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => None,
            response = receiver => response.ok(),
        };

        outcome.ok_or(TransportError::Cancelled { correlation })
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.table.forget(self.correlation, self.ticket);
    }
}

async fn listen_for_cancellation(
    table: Weak<PromiseTable>,
    correlation: Correlation,
    ticket: u64,
    cancellation: CancellationToken,
    settled: CancellationToken,
) {
    tokio::select! {
        _ = settled.cancelled() => {}
        _ = cancellation.cancelled() => {
            if let Some(table) = table.upgrade() {
                table.forget(correlation, ticket);
                debug!(%correlation, "Pending response cancelled");
            }
        }
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("correlation", &self.correlation)
            .finish()
    }
}
