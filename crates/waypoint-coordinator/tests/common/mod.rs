//! Shared fixture: an in-process cluster of two regional participants,
//! an in-memory (or file-backed) transaction log, and a coordinator
//! composed exactly as in production, minus the network.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use waypoint_coordinator::{Coordinator, ParticipantSet};
use waypoint_core::api::ParticipantApi;
use waypoint_core::config::{HandoffConfig, MonitorConfig, RetryConfig, WaypointConfig};
use waypoint_core::ride::{Location, Ride, RideStatus};
use waypoint_participant::Participant;
use waypoint_storage::{MemoryRegionStore, RegionStore, TransactionLog};

pub const PHOENIX: &str = "Phoenix";
pub const LOS_ANGELES: &str = "Los Angeles";

/// Two-region cluster handles.
pub struct Cluster {
    pub coordinator: Arc<Coordinator>,
    pub phoenix: Arc<MemoryRegionStore>,
    pub los_angeles: Arc<MemoryRegionStore>,
    pub log: Arc<dyn TransactionLog>,
}

/// Fast test configuration: real protocol defaults are seconds-scale,
/// which has no place in a unit suite.
pub fn test_config() -> WaypointConfig {
    let mut config = WaypointConfig::default();
    config.handoff = HandoffConfig {
        prepare_timeout_ms: 500,
        commit_timeout_ms: 500,
        overall_timeout_ms: 5000,
        retry: RetryConfig {
            base_ms: 1,
            cap_ms: 5,
            max_attempts: 2,
        },
    };
    config.monitor = MonitorConfig {
        interval_ms: 20,
        timeout_ms: 200,
        failure_threshold: 3,
    };
    config
}

/// Builds a cluster over the given log, with an optional global
/// replica participant.
pub fn cluster_with_log(
    log: Arc<dyn TransactionLog>,
    replica: Option<Arc<dyn ParticipantApi>>,
) -> Cluster {
    let phoenix = Arc::new(MemoryRegionStore::new(PHOENIX));
    let los_angeles = Arc::new(MemoryRegionStore::new(LOS_ANGELES));

    let mut participants: BTreeMap<String, Arc<dyn ParticipantApi>> = BTreeMap::new();
    participants.insert(
        PHOENIX.to_string(),
        Arc::new(Participant::new(
            PHOENIX,
            phoenix.clone() as Arc<dyn RegionStore>,
        )),
    );
    participants.insert(
        LOS_ANGELES.to_string(),
        Arc::new(Participant::new(
            LOS_ANGELES,
            los_angeles.clone() as Arc<dyn RegionStore>,
        )),
    );

    let coordinator = Coordinator::new(
        test_config(),
        Arc::new(ParticipantSet::new(participants)),
        Arc::clone(&log),
        replica,
    );

    Cluster {
        coordinator,
        phoenix,
        los_angeles,
        log,
    }
}

pub fn cluster() -> Cluster {
    cluster_with_log(
        Arc::new(waypoint_storage::MemoryTransactionLog::new()),
        None,
    )
}

/// A valid ride document for a region, with a deterministic timestamp.
pub fn ride(id: &str, region: &str, fare: f64, ts_secs: i64) -> Ride {
    Ride {
        ride_id: id.to_string(),
        vehicle_id: "AV-7001".to_string(),
        customer_id: "C-440012".to_string(),
        status: RideStatus::InProgress,
        region: region.to_string(),
        fare,
        start_location: Location {
            lat: 33.4484,
            lon: -112.0740,
        },
        current_location: Location {
            lat: 33.7000,
            lon: -113.2000,
        },
        end_location: Location {
            lat: 34.0522,
            lon: -118.2437,
        },
        timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
        handoff_status: None,
        locked: false,
        transaction_id: None,
    }
}

/// Drives the monitor until a region is classified `UNAVAILABLE`.
pub async fn mark_unavailable(cluster: &Cluster, store: &MemoryRegionStore) {
    store.set_available(false);
    for _ in 0..3 {
        cluster.coordinator.monitor().probe_all().await;
    }
}
