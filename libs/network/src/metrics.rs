//! Connection Metrics
//!
//! Lock-free counters updated by the inbound and outbound loops. Readers
//! take a [`MetricsSnapshot`]; counters are independent, so a snapshot taken
//! while traffic flows is not a consistent cut across fields.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-connection traffic counters
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    failed_sends: AtomicU64,
    discarded_frames: AtomicU64,
    promises_fulfilled: AtomicU64,
    unsolicited_dispatched: AtomicU64,
}

/// Point-in-time copy of [`ConnectionMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub failed_sends: u64,
    pub discarded_frames: u64,
    pub promises_fulfilled: u64,
    pub unsolicited_dispatched: u64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed_send(&self) {
        self.failed_sends.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_receive(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A frame was read off the wire but could not be used
    #[inline]
    pub fn record_discarded(&self, bytes: usize) {
        self.discarded_frames.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fulfilled(&self) {
        self.promises_fulfilled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unsolicited(&self) {
        self.unsolicited_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            failed_sends: self.failed_sends.load(Ordering::Relaxed),
            discarded_frames: self.discarded_frames.load(Ordering::Relaxed),
            promises_fulfilled: self.promises_fulfilled.load(Ordering::Relaxed),
            unsolicited_dispatched: self.unsolicited_dispatched.load(Ordering::Relaxed),
        }
    }
}
