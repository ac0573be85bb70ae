//! Buffer drainer.
//!
//! Subscribes to health transitions and, whenever a region comes back
//! `AVAILABLE`, replays that region's deferred handoffs in FIFO order:
//!
//! - `BUFFERED` result (region flapped back down): return the entry to
//!   the head of the queue and stop this drain cycle;
//! - `not_found` abort: the ride may still be in flight elsewhere —
//!   re-queue once, discard after the second miss;
//! - anything else (success, other aborts, partial): the entry is done.
//!
//! The drain token in the buffer guarantees at most one drain per
//! target at a time.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use waypoint_core::api::{HandoffRequest, HandoffStatus};
use waypoint_core::error::Fault;

use crate::buffer::{BufferedHandoff, HandoffBuffer};
use crate::counters::HandoffCounters;
use crate::engine::HandoffEngine;
use crate::health::{HealthMonitor, HealthState};

/// Attempts after which a `not_found` entry is dropped.
const NOT_FOUND_DISCARD_AFTER: u32 = 2;

/// Replays deferred handoffs when their target recovers.
pub struct BufferDrainer {
    engine: Arc<HandoffEngine>,
    buffer: Arc<HandoffBuffer>,
    monitor: Arc<HealthMonitor>,
    counters: Arc<HandoffCounters>,
}

impl BufferDrainer {
    /// Wires a drainer over its collaborators.
    #[must_use]
    pub fn new(
        engine: Arc<HandoffEngine>,
        buffer: Arc<HandoffBuffer>,
        monitor: Arc<HealthMonitor>,
        counters: Arc<HandoffCounters>,
    ) -> Self {
        Self {
            engine,
            buffer,
            monitor,
            counters,
        }
    }

    /// Spawns the event loop. Abort the returned handle on shutdown.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let drainer = Arc::clone(self);
        let mut events = drainer.monitor.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.state == HealthState::Available => {
                        drainer.drain_target(&event.region).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed transitions; catch up on every region
                        // that is currently available.
                        warn!(skipped, "drainer lagged behind health events");
                        for region in drainer.monitor.snapshot().keys() {
                            if drainer.monitor.is_available(region) {
                                drainer.drain_target(region).await;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Drains one target's queue until it empties or the target goes
    /// unhealthy again.
    pub async fn drain_target(&self, target: &str) {
        let Some(_token) = self.buffer.begin_drain(target) else {
            return;
        };
        if self.buffer.len(target) == 0 {
            return;
        }

        info!(target, queued = self.buffer.len(target), "draining buffered handoffs");
        while let Some(mut entry) = self.buffer.pop_front(target) {
            entry.attempts += 1;
            let req = HandoffRequest {
                ride_id: entry.ride_id.clone(),
                source: entry.source.clone(),
                target: entry.target.clone(),
            };
            let response = self.engine.execute(&req, false).await;
            match response.status {
                HandoffStatus::Buffered => {
                    // Still unhealthy; keep the entry's place and stop.
                    self.buffer.push_front(entry);
                    break;
                }
                HandoffStatus::Success => {
                    self.counters.drained.fetch_add(1, Ordering::Relaxed);
                    info!(
                        ride_id = %entry.ride_id,
                        target,
                        attempts = entry.attempts,
                        "buffered handoff completed"
                    );
                }
                HandoffStatus::Aborted
                    if response.reason.as_deref() == Some(Fault::NotFound.as_str()) =>
                {
                    self.handle_not_found(entry);
                }
                HandoffStatus::Aborted | HandoffStatus::Partial => {
                    info!(
                        ride_id = %entry.ride_id,
                        target,
                        status = ?response.status,
                        reason = response.reason.as_deref().unwrap_or(""),
                        "buffered handoff resolved without success"
                    );
                }
            }
        }
    }

    fn handle_not_found(&self, entry: BufferedHandoff) {
        if entry.attempts >= NOT_FOUND_DISCARD_AFTER {
            warn!(
                ride_id = %entry.ride_id,
                source = %entry.source,
                target = %entry.target,
                attempts = entry.attempts,
                "discarding buffered handoff: ride missing at source"
            );
        } else {
            self.buffer.push_back(entry);
        }
    }
}
