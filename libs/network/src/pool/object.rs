//! Generic object pool with scoped checkout
//!
//! Objects are handed out inside a [`Pooled`] guard and go back to the pool
//! when the guard drops, on every exit path. Only one borrower ever holds a
//! given object.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Objects that can be reset for another borrower
pub trait Recycle {
    /// Clear per-use state. Returns `false` if the object must not be reused.
    fn recycle(&mut self) -> bool;
}

/// Reuse cache for expensive-to-construct objects
pub struct ObjectPool<T: Recycle> {
    idle: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_idle: usize,
    outstanding: AtomicUsize,
    created: AtomicUsize,
}

impl<T: Recycle> ObjectPool<T> {
    /// Create a pool keeping at most `max_idle` objects while idle
    pub fn new<F>(max_idle: usize, factory: F) -> Arc<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(max_idle.min(64))),
            factory: Box::new(factory),
            max_idle,
            outstanding: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
        })
    }

    /// Check out an object, creating one if none is idle
    pub fn take(self: &Arc<Self>) -> Pooled<T> {
        let item = match self.idle.lock().pop() {
            Some(item) => item,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, mut item: T) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);

        if !item.recycle() {
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }

    /// Objects currently checked out
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Objects ever constructed by the factory
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Objects waiting for reuse
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl<T: Recycle> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("outstanding", &self.outstanding())
            .field("created", &self.created())
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// Exclusive checkout of a pooled object
pub struct Pooled<T: Recycle> {
    item: Option<T>,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the item out
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}
