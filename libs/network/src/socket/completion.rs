//! Single-slot completion handoff
//!
//! One producer ([`OpCompleter`]) publishes a result, one consumer awaits it.
//! The result may land before the consumer starts waiting, in which case the
//! wait returns without suspending. Each `reset` opens a new cycle and
//! invalidates completers handed out for the previous one.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct Slot<T> {
    generation: u64,
    result: Option<T>,
    completed: bool,
    abandoned: bool,
    /// Completers handed out for the current generation and not yet dropped
    live: usize,
    waker: Option<Waker>,
}

/// Consumer side of a single-slot completion
pub struct OpCompletion<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

/// Producer side; completes the slot at most once per cycle
pub struct OpCompleter<T> {
    slot: Arc<Mutex<Slot<T>>>,
    generation: u64,
}

impl<T> OpCompletion<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                result: None,
                completed: false,
                abandoned: false,
                live: 0,
                waker: None,
            })),
        }
    }

    /// Producer handle for the current cycle
    pub fn completer(&self) -> OpCompleter<T> {
        let generation = {
            let mut slot = self.slot.lock();
            slot.live += 1;
            slot.generation
        };
        OpCompleter {
            slot: Arc::clone(&self.slot),
            generation,
        }
    }

    /// Start a new cycle, discarding any unconsumed result
    pub fn reset(&mut self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        slot.result = None;
        slot.completed = false;
        slot.abandoned = false;
        slot.live = 0;
        slot.waker = None;
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().completed
    }

    /// Wait for this cycle's result
    ///
    /// Resolves to `None` if every completer for the cycle was dropped
    /// without completing. The exclusive borrow keeps it to one waiter.
    pub fn wait(&mut self) -> Wait<'_, T> {
        Wait { completion: self }
    }
}

impl<T> Default for OpCompletion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for OpCompletion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("OpCompletion")
            .field("generation", &slot.generation)
            .field("completed", &slot.completed)
            .finish()
    }
}

impl<T> OpCompleter<T> {
    /// Publish the result. Returns `false` if this cycle already completed
    /// or the completion has since been reset.
    pub fn complete(&self, value: T) -> bool {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.generation != self.generation || slot.completed {
                return false;
            }
            slot.completed = true;
            slot.result = Some(value);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl<T> Drop for OpCompleter<T> {
    fn drop(&mut self) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.generation != self.generation {
                return;
            }
            slot.live = slot.live.saturating_sub(1);
            // Another completer of this cycle may still finish it
            if slot.completed || slot.live > 0 {
                return;
            }
            slot.abandoned = true;
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> fmt::Debug for OpCompleter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpCompleter")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Future returned by [`OpCompletion::wait`]
pub struct Wait<'a, T> {
    completion: &'a mut OpCompletion<T>,
}

impl<T> Future for Wait<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut slot = self.completion.slot.lock();
        if let Some(value) = slot.result.take() {
            return Poll::Ready(Some(value));
        }
        if slot.completed || slot.abandoned {
            return Poll::Ready(None);
        }
        match &slot.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}
