//! Shared handoff counters for observability.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters updated by the engine, drainer, and recovery.
#[derive(Debug, Default)]
pub struct HandoffCounters {
    /// Handoffs that reached `COMMITTED`.
    pub succeeded: AtomicU64,
    /// Handoffs that reached `ABORTED`.
    pub aborted: AtomicU64,
    /// Handoffs deferred into the buffer.
    pub buffered: AtomicU64,
    /// Handoffs returned as `PARTIAL`.
    pub partial: AtomicU64,
    /// Buffered entries completed by the drainer.
    pub drained: AtomicU64,
    /// Transactions resolved by startup recovery.
    pub recovered: AtomicU64,
}

impl HandoffCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy for serialization.
    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`HandoffCounters`].
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    /// Handoffs that reached `COMMITTED`.
    pub succeeded: u64,
    /// Handoffs that reached `ABORTED`.
    pub aborted: u64,
    /// Handoffs deferred into the buffer.
    pub buffered: u64,
    /// Handoffs returned as `PARTIAL`.
    pub partial: u64,
    /// Buffered entries completed by the drainer.
    pub drained: u64,
    /// Transactions resolved by startup recovery.
    pub recovered: u64,
}
