//! Bucketed transfer-buffer pool
//!
//! Buffers are grouped in power-of-two size classes starting at 256 bytes,
//! with the largest class capped at `max_buffer_size`. Requests above that
//! size get a one-off allocation that is freed on return instead of pooled,
//! so the pool never holds onto oversized buffers.

use crate::config::PoolConfig;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MIN_CLASS_SHIFT: u32 = 8;
const MIN_CLASS_SIZE: usize = 1 << MIN_CLASS_SHIFT;

/// Pool of reusable byte buffers
pub struct BufferPool {
    classes: Vec<Mutex<Vec<Vec<u8>>>>,
    max_buffer_size: usize,
    max_pool_bytes: usize,
    max_frame_size: usize,
    retained: AtomicUsize,
    outstanding: AtomicUsize,
    allocated: AtomicUsize,
    adhoc: AtomicUsize,
}

impl BufferPool {
    pub fn new(config: &PoolConfig) -> Arc<Self> {
        let max_buffer_size = config.max_buffer_size.max(1);

        // Power-of-two classes strictly below the cap, then the cap itself
        let mut class_count = 1;
        let mut size = MIN_CLASS_SIZE;
        while size < max_buffer_size {
            class_count += 1;
            size <<= 1;
        }

        Arc::new(Self {
            classes: (0..class_count).map(|_| Mutex::new(Vec::new())).collect(),
            max_buffer_size,
            max_pool_bytes: config.max_pool_bytes,
            max_frame_size: config.max_frame_size.max(max_buffer_size),
            retained: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
            adhoc: AtomicUsize::new(0),
        })
    }

    /// Size class index and capacity for a request of `len` bytes
    fn class_of(&self, len: usize) -> Option<(usize, usize)> {
        if len > self.max_buffer_size {
            return None;
        }
        let capacity = len
            .max(MIN_CLASS_SIZE)
            .next_power_of_two()
            .min(self.max_buffer_size);
        let index = if capacity == self.max_buffer_size {
            self.classes.len() - 1
        } else {
            (capacity.trailing_zeros() - MIN_CLASS_SHIFT) as usize
        };
        Some((index, capacity))
    }

    /// Check out a buffer of exactly `len` usable bytes
    ///
    /// Contents are unspecified; callers overwrite before reading.
    pub fn take(self: &Arc<Self>, len: usize) -> PooledBuffer {
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let (buf, class) = match self.class_of(len) {
            Some((index, capacity)) => {
                let reused = self.classes[index].lock().pop();
                let buf = match reused {
                    Some(buf) => {
                        self.retained.fetch_sub(capacity, Ordering::AcqRel);
                        buf
                    }
                    None => {
                        self.allocated.fetch_add(1, Ordering::Relaxed);
                        vec![0u8; capacity]
                    }
                };
                (buf, Some(index))
            }
            None => {
                self.adhoc.fetch_add(1, Ordering::Relaxed);
                (vec![0u8; len], None)
            }
        };

        PooledBuffer {
            buf,
            len,
            class,
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, buf: Vec<u8>, class: Option<usize>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);

        let Some(index) = class else {
            return;
        };

        let capacity = buf.len();
        let retained = self.retained.fetch_add(capacity, Ordering::AcqRel);
        if retained + capacity > self.max_pool_bytes {
            self.retained.fetch_sub(capacity, Ordering::AcqRel);
            return;
        }
        self.classes[index].lock().push(buf);
    }

    /// Buffers currently checked out
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Bytes held by idle pooled buffers
    pub fn retained_bytes(&self) -> usize {
        self.retained.load(Ordering::Acquire)
    }

    /// Pooled buffers allocated so far
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// One-off allocations for oversized requests
    pub fn adhoc_allocations(&self) -> usize {
        self.adhoc.load(Ordering::Relaxed)
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Largest request readers should make for one frame payload
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("classes", &self.classes.len())
            .field("max_buffer_size", &self.max_buffer_size)
            .field("retained_bytes", &self.retained_bytes())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Exclusive checkout of a transfer buffer
pub struct PooledBuffer {
    buf: Vec<u8>,
    len: usize,
    class: Option<usize>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// True when this buffer bypassed the pool
    pub fn is_adhoc(&self) -> bool {
        self.class.is_none()
    }

    /// Capacity of the underlying allocation
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.give_back(buf, self.class);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .field("adhoc", &self.is_adhoc())
            .finish()
    }
}
