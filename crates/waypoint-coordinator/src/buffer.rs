//! Deferred-handoff buffer.
//!
//! One FIFO queue per target region, capped at `max_per_region`. The
//! buffer is in-memory: buffered entries do not survive a coordinator
//! crash, which the coordinator warns about at startup.
//!
//! The drain token gives the drainer per-target exclusion so at most
//! one drain runs per region at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// A handoff waiting for its target region to recover.
#[derive(Debug, Clone, Serialize)]
pub struct BufferedHandoff {
    /// Ride to move.
    pub ride_id: String,
    /// Region currently holding the ride.
    pub source: String,
    /// Region that should hold it next.
    pub target: String,
    /// When the entry was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Drain attempts so far.
    pub attempts: u32,
}

/// Error returned when a target's queue is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("buffer full for target region '{target}' ({capacity} entries)")]
pub struct BufferFull {
    /// Saturated target region.
    pub target: String,
    /// Configured cap.
    pub capacity: usize,
}

/// Per-target FIFO buffer of deferred handoffs.
pub struct HandoffBuffer {
    max_per_region: usize,
    queues: Mutex<HashMap<String, VecDeque<BufferedHandoff>>>,
    draining: Mutex<HashSet<String>>,
}

impl HandoffBuffer {
    /// Creates an empty buffer with the given per-target cap.
    #[must_use]
    pub fn new(max_per_region: usize) -> Self {
        Self {
            max_per_region,
            queues: Mutex::new(HashMap::new()),
            draining: Mutex::new(HashSet::new()),
        }
    }

    /// Appends an entry to its target's queue.
    ///
    /// # Errors
    ///
    /// Returns [`BufferFull`] when the target's queue is at capacity.
    pub fn enqueue(
        &self,
        ride_id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), BufferFull> {
        let target = target.into();
        let mut queues = self.queues.lock();
        let queue = queues.entry(target.clone()).or_default();
        if queue.len() >= self.max_per_region {
            return Err(BufferFull {
                target,
                capacity: self.max_per_region,
            });
        }
        queue.push_back(BufferedHandoff {
            ride_id: ride_id.into(),
            source: source.into(),
            target,
            enqueued_at: Utc::now(),
            attempts: 0,
        });
        Ok(())
    }

    /// Pops the oldest entry for a target.
    #[must_use]
    pub fn pop_front(&self, target: &str) -> Option<BufferedHandoff> {
        self.queues.lock().get_mut(target)?.pop_front()
    }

    /// Returns an entry to the head of its queue (the target is still
    /// unhealthy; the entry keeps its place).
    pub fn push_front(&self, entry: BufferedHandoff) {
        self.queues
            .lock()
            .entry(entry.target.clone())
            .or_default()
            .push_front(entry);
    }

    /// Re-appends an entry at the tail (retryable refusal; it will get
    /// another attempt after the rest of the queue).
    pub fn push_back(&self, entry: BufferedHandoff) {
        self.queues
            .lock()
            .entry(entry.target.clone())
            .or_default()
            .push_back(entry);
    }

    /// Entries queued for one target.
    #[must_use]
    pub fn len(&self, target: &str) -> usize {
        self.queues.lock().get(target).map_or(0, VecDeque::len)
    }

    /// Entries queued across all targets.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Claims the drain exclusion for a target. Returns `None` when a
    /// drain is already running there.
    #[must_use]
    pub fn begin_drain(self: &Arc<Self>, target: &str) -> Option<DrainToken> {
        if self.draining.lock().insert(target.to_string()) {
            Some(DrainToken {
                buffer: Arc::clone(self),
                target: target.to_string(),
            })
        } else {
            None
        }
    }
}

/// Exclusive permission to drain one target's queue; released on drop.
pub struct DrainToken {
    buffer: Arc<HandoffBuffer>,
    target: String,
}

impl Drop for DrainToken {
    fn drop(&mut self) {
        self.buffer.draining.lock().remove(&self.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_per_target() {
        let buffer = HandoffBuffer::new(10);
        buffer.enqueue("R-1", "Phoenix", "Los Angeles").unwrap();
        buffer.enqueue("R-2", "Phoenix", "Los Angeles").unwrap();
        buffer.enqueue("R-3", "Phoenix", "Tucson").unwrap();

        assert_eq!(buffer.pop_front("Los Angeles").unwrap().ride_id, "R-1");
        assert_eq!(buffer.pop_front("Los Angeles").unwrap().ride_id, "R-2");
        assert!(buffer.pop_front("Los Angeles").is_none());
        assert_eq!(buffer.pop_front("Tucson").unwrap().ride_id, "R-3");
    }

    #[test]
    fn test_capacity_per_target() {
        let buffer = HandoffBuffer::new(2);
        buffer.enqueue("R-1", "Phoenix", "Los Angeles").unwrap();
        buffer.enqueue("R-2", "Phoenix", "Los Angeles").unwrap();
        assert!(buffer.enqueue("R-3", "Phoenix", "Los Angeles").is_err());
        // Other targets are unaffected.
        buffer.enqueue("R-3", "Phoenix", "Tucson").unwrap();
    }

    #[test]
    fn test_push_front_preserves_position() {
        let buffer = HandoffBuffer::new(10);
        buffer.enqueue("R-1", "Phoenix", "Los Angeles").unwrap();
        buffer.enqueue("R-2", "Phoenix", "Los Angeles").unwrap();

        let first = buffer.pop_front("Los Angeles").unwrap();
        buffer.push_front(first);
        assert_eq!(buffer.pop_front("Los Angeles").unwrap().ride_id, "R-1");
    }

    #[test]
    fn test_drain_exclusion() {
        let buffer = Arc::new(HandoffBuffer::new(10));
        let token = buffer.begin_drain("Los Angeles").unwrap();
        assert!(buffer.begin_drain("Los Angeles").is_none());
        // Other targets drain independently.
        assert!(buffer.begin_drain("Tucson").is_some());
        drop(token);
        assert!(buffer.begin_drain("Los Angeles").is_some());
    }
}
