//! Dispatch counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the accept loop and connection tasks.
#[derive(Debug, Default)]
pub struct KernelStats {
    connections_accepted: AtomicU64,
    messages_dispatched: AtomicU64,
    dispatch_misses: AtomicU64,
    decode_errors: AtomicU64,
    queue_drops: AtomicU64,
    dispatch_failures: AtomicU64,
}

/// Point-in-time copy of [`KernelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub messages_dispatched: u64,
    /// Messages dropped because no handler was subscribed.
    pub dispatch_misses: u64,
    /// Connections closed because a frame failed to decode.
    pub decode_errors: u64,
    /// Messages discarded by a full dispatch queue.
    pub queue_drops: u64,
    /// Connections closed because their dispatch task died.
    pub dispatch_failures: u64,
}

impl KernelStats {
    pub(crate) fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn missed(&self) {
        self.dispatch_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn queue_dropped(&self) {
        self.queue_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dispatch_failed(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            dispatch_misses: self.dispatch_misses.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}
