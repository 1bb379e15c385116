//! # Resource Pools
//!
//! Reuse caches for the two resources every socket-touching path needs:
//! socket operation handles and transfer buffers. A [`Pools`] bundle is
//! built once from [`PoolConfig`] and cloned into each component that needs
//! it; there is no process-wide pool.
//!
//! Checkouts are RAII guards. Dropping a guard returns the resource, so a
//! borrow ends on every exit path (success, `?` early return, task
//! cancellation or panic).

pub mod buffer;
pub mod object;

pub use buffer::{BufferPool, PooledBuffer};
pub use object::{ObjectPool, Pooled, Recycle};

use crate::config::PoolConfig;
use crate::socket::SocketOp;
use std::sync::Arc;

/// Pools shared by the connections and servers of one transport instance
#[derive(Clone, Debug)]
pub struct Pools {
    ops: Arc<ObjectPool<SocketOp>>,
    buffers: Arc<BufferPool>,
}

impl Pools {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            ops: ObjectPool::new(config.max_idle_ops, SocketOp::new),
            buffers: BufferPool::new(config),
        }
    }

    /// Borrow a reset socket operation
    pub fn take_op(&self) -> Pooled<SocketOp> {
        self.ops.take()
    }

    /// Borrow a buffer of exactly `len` bytes
    pub fn take_buffer(&self, len: usize) -> PooledBuffer {
        self.buffers.take(len)
    }

    pub fn ops(&self) -> &Arc<ObjectPool<SocketOp>> {
        &self.ops
    }

    pub fn buffers(&self) -> &Arc<BufferPool> {
        &self.buffers
    }
}

impl Default for Pools {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}
