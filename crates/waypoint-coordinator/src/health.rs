//! Region health monitor.
//!
//! A single cooperative loop probes every participant's health endpoint
//! at a fixed interval and classifies each region:
//!
//! - `UNKNOWN` at startup, until the first probe round lands;
//! - success → `AVAILABLE` immediately, failures reset;
//! - a probe failure increments `consecutive_failures`; reaching the
//!   threshold flips the region to `UNAVAILABLE`.
//!
//! Transitions are published on a broadcast channel; the buffer drainer
//! and the query router hold read-only subscriptions. The monitor never
//! blocks coordinator operations — it only informs them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use waypoint_core::config::MonitorConfig;

use crate::client::ParticipantSet;

/// Classification of one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    /// Last probe succeeded.
    Available,
    /// The failure threshold was reached.
    Unavailable,
    /// No probe has completed yet.
    Unknown,
}

/// Per-region health record. Mutated only by the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct RegionHealth {
    /// Current classification.
    pub state: HealthState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Instant of the last successful probe.
    pub last_ok_at: Option<DateTime<Utc>>,
    /// Latency of the last successful probe.
    pub last_latency_ms: Option<u64>,
    /// Store primary reported by the last successful probe.
    pub primary: Option<String>,
    /// Replication lag reported by the last successful probe.
    pub replication_lag_ms: Option<u64>,
}

impl RegionHealth {
    fn unknown() -> Self {
        Self {
            state: HealthState::Unknown,
            consecutive_failures: 0,
            last_ok_at: None,
            last_latency_ms: None,
            primary: None,
            replication_lag_ms: None,
        }
    }
}

/// A state transition published to subscribers.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    /// Region that changed.
    pub region: String,
    /// New classification.
    pub state: HealthState,
}

/// The health monitor.
pub struct HealthMonitor {
    participants: Arc<ParticipantSet>,
    config: MonitorConfig,
    records: RwLock<HashMap<String, RegionHealth>>,
    events: broadcast::Sender<HealthEvent>,
}

impl HealthMonitor {
    /// Creates a monitor over a participant registry. Every region
    /// starts `UNKNOWN`.
    #[must_use]
    pub fn new(participants: Arc<ParticipantSet>, config: MonitorConfig) -> Self {
        let records = participants
            .regions()
            .into_iter()
            .map(|region| (region, RegionHealth::unknown()))
            .collect();
        let (events, _) = broadcast::channel(64);
        Self {
            participants,
            config,
            records: RwLock::new(records),
            events,
        }
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Snapshot of every region's record, in deterministic order.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, RegionHealth> {
        self.records
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// True when the region has reached the failure threshold. The
    /// handoff health gate keys off this — `UNKNOWN` does not block.
    #[must_use]
    pub fn is_unavailable(&self, region: &str) -> bool {
        self.records
            .read()
            .get(region)
            .is_some_and(|r| r.state == HealthState::Unavailable)
    }

    /// True when the region's last probe succeeded.
    #[must_use]
    pub fn is_available(&self, region: &str) -> bool {
        self.records
            .read()
            .get(region)
            .is_some_and(|r| r.state == HealthState::Available)
    }

    /// Runs one probe round against every region, in parallel.
    pub async fn probe_all(&self) {
        let probes = self.participants.iter().map(|(region, participant)| {
            let region = region.clone();
            let participant = Arc::clone(participant);
            let timeout = self.config.timeout();
            async move {
                let started = Instant::now();
                let result = tokio::time::timeout(timeout, participant.health()).await;
                #[allow(clippy::cast_possible_truncation)]
                let latency_ms = started.elapsed().as_millis() as u64;
                match result {
                    Ok(Ok(report)) => (region, latency_ms, Some(report)),
                    Ok(Err(_)) | Err(_) => (region, latency_ms, None),
                }
            }
        });

        for (region, latency_ms, report) in join_all(probes).await {
            match report {
                Some(report) => self.record_success(&region, latency_ms, &report),
                None => self.record_failure(&region),
            }
        }
    }

    fn record_success(
        &self,
        region: &str,
        latency_ms: u64,
        report: &waypoint_core::api::HealthReport,
    ) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(region) else {
            return;
        };
        let prior = record.state;
        record.state = HealthState::Available;
        record.consecutive_failures = 0;
        record.last_ok_at = Some(Utc::now());
        record.last_latency_ms = Some(latency_ms);
        record.primary = report.primary.clone();
        record.replication_lag_ms = report.replication_lag_ms;
        drop(records);

        if prior != HealthState::Available {
            if prior == HealthState::Unavailable {
                info!(region, "region recovered");
            } else {
                debug!(region, "region available");
            }
            self.publish(region, HealthState::Available);
        }
    }

    fn record_failure(&self, region: &str) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(region) else {
            return;
        };
        record.consecutive_failures += 1;
        let flipped = record.state != HealthState::Unavailable
            && record.consecutive_failures >= self.config.failure_threshold;
        let failures = record.consecutive_failures;
        if flipped {
            record.state = HealthState::Unavailable;
        }
        drop(records);

        if flipped {
            warn!(region, failures, "region marked unavailable");
            self.publish(region, HealthState::Unavailable);
        } else {
            debug!(region, failures, "health probe failed");
        }
    }

    fn publish(&self, region: &str, state: HealthState) {
        // No subscribers is fine; the snapshot still carries the state.
        let _ = self.events.send(HealthEvent {
            region: region.to_string(),
            state,
        });
    }

    /// Spawns the periodic probe loop. Abort the returned handle on
    /// shutdown.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.probe_all().await;
            }
        })
    }
}
