//! End-to-end handoff scenarios over an in-process two-region cluster:
//!
//! 1. Happy path: the ride moves atomically and the log reads
//!    `COMMITTED`.
//! 2. Target duplicate: both regions hold the ride; the handoff aborts
//!    and neither document changes.
//! 3. Contested: two concurrent handoffs of the same ride; exactly one
//!    commits.
//! 4. Unavailable target: the handoff buffers, then drains to
//!    completion once the region recovers.

mod common;

use common::{cluster, mark_unavailable, ride, LOS_ANGELES, PHOENIX};
use waypoint_core::api::{HandoffRequest, HandoffStatus};
use waypoint_core::ride::HandoffStage;
use waypoint_core::transaction::TxState;
use waypoint_storage::RegionStore;

fn handoff_req(ride_id: &str) -> HandoffRequest {
    HandoffRequest {
        ride_id: ride_id.to_string(),
        source: PHOENIX.to_string(),
        target: LOS_ANGELES.to_string(),
    }
}

#[tokio::test]
async fn test_happy_path_handoff() {
    let cluster = cluster();
    cluster
        .phoenix
        .insert_ride(ride("R-1", PHOENIX, 25.0, 1000))
        .await
        .unwrap();

    let response = cluster.coordinator.handoff(&handoff_req("R-1")).await;
    assert_eq!(response.status, HandoffStatus::Success);
    let tx_id = response.tx_id.expect("committed handoff carries a tx id");

    // The ride lives at the target only, re-tagged and unlocked.
    let moved = cluster.los_angeles.get_ride("R-1").await.unwrap();
    assert_eq!(moved.region, LOS_ANGELES);
    assert!(!moved.locked);
    assert!(moved.transaction_id.is_none());
    assert_eq!(moved.handoff_status, Some(HandoffStage::Completed));
    assert!(cluster.phoenix.get_ride("R-1").await.is_err());

    // One terminal record with the snapshot captured at PREPARE.
    let record = cluster.log.get(&tx_id).await.unwrap().unwrap();
    assert_eq!(record.state, TxState::Committed);
    assert!(record.unanimous_commit());
    assert_eq!(record.ride_snapshot.as_ref().unwrap().ride_id, "R-1");
    assert!(record.committed_at.is_some());
}

#[tokio::test]
async fn test_target_duplicate_aborts() {
    let cluster = cluster();
    cluster
        .phoenix
        .insert_ride(ride("R-2", PHOENIX, 30.0, 1000))
        .await
        .unwrap();
    cluster
        .los_angeles
        .insert_ride(ride("R-2", LOS_ANGELES, 30.0, 900))
        .await
        .unwrap();

    let response = cluster.coordinator.handoff(&handoff_req("R-2")).await;
    assert_eq!(response.status, HandoffStatus::Aborted);
    assert_eq!(response.reason.as_deref(), Some("duplicate"));

    // Both documents unchanged; the source lock was rolled back.
    let phoenix_doc = cluster.phoenix.get_ride("R-2").await.unwrap();
    assert!(!phoenix_doc.locked);
    assert!(phoenix_doc.transaction_id.is_none());
    assert!(cluster.los_angeles.get_ride("R-2").await.is_ok());

    let tx_id = response.tx_id.unwrap();
    let record = cluster.log.get(&tx_id).await.unwrap().unwrap();
    assert_eq!(record.state, TxState::Aborted);
    assert_eq!(record.error.as_deref(), Some("duplicate"));
}

#[tokio::test]
async fn test_concurrent_handoffs_serialize_on_the_lock() {
    let cluster = cluster();
    cluster
        .phoenix
        .insert_ride(ride("R-3", PHOENIX, 40.0, 1000))
        .await
        .unwrap();

    let req1 = handoff_req("R-3");
    let req2 = handoff_req("R-3");
    let (a, b) = tokio::join!(
        cluster.coordinator.handoff(&req1),
        cluster.coordinator.handoff(&req2),
    );

    let mut statuses = [a.status, b.status];
    statuses.sort_by_key(|s| format!("{s:?}"));
    assert_eq!(statuses, [HandoffStatus::Aborted, HandoffStatus::Success]);

    // The loser lost the lock CAS (contested) or arrived after the
    // winner's delete (not_found); either way the data is consistent.
    let loser = if a.status == HandoffStatus::Aborted { &a } else { &b };
    let reason = loser.reason.as_deref().unwrap();
    assert!(
        reason == "contested" || reason == "not_found",
        "unexpected abort reason: {reason}"
    );

    assert_eq!(cluster.los_angeles.get_ride("R-3").await.unwrap().region, LOS_ANGELES);
    assert!(cluster.phoenix.get_ride("R-3").await.is_err());
}

#[tokio::test]
async fn test_unavailable_target_buffers_then_drains() {
    let cluster = cluster();
    cluster
        .phoenix
        .insert_ride(ride("R-4", PHOENIX, 18.0, 1000))
        .await
        .unwrap();

    mark_unavailable(&cluster, &cluster.los_angeles).await;

    let response = cluster.coordinator.handoff(&handoff_req("R-4")).await;
    assert_eq!(response.status, HandoffStatus::Buffered);
    assert!(response.tx_id.is_none());
    assert_eq!(cluster.coordinator.buffered_entries(), 1);
    // The ride is untouched while buffered.
    assert!(!cluster.phoenix.get_ride("R-4").await.unwrap().locked);

    // Recovery of the region flushes the queue.
    cluster.los_angeles.set_available(true);
    cluster.coordinator.monitor().probe_all().await;
    cluster.coordinator.drainer().drain_target(LOS_ANGELES).await;

    assert_eq!(cluster.coordinator.buffered_entries(), 0);
    assert!(cluster.los_angeles.get_ride("R-4").await.is_ok());
    assert!(cluster.phoenix.get_ride("R-4").await.is_err());
}

#[tokio::test]
async fn test_source_unavailable_fails_fast() {
    let cluster = cluster();
    mark_unavailable(&cluster, &cluster.phoenix).await;

    let response = cluster.coordinator.handoff(&handoff_req("R-5")).await;
    assert_eq!(response.status, HandoffStatus::Aborted);
    assert_eq!(response.reason.as_deref(), Some("source_unavailable"));
    assert_eq!(cluster.coordinator.buffered_entries(), 0);
}

#[tokio::test]
async fn test_invalid_arguments_rejected() {
    let cluster = cluster();

    let same_region = HandoffRequest {
        ride_id: "R-6".to_string(),
        source: PHOENIX.to_string(),
        target: PHOENIX.to_string(),
    };
    let response = cluster.coordinator.handoff(&same_region).await;
    assert_eq!(response.status, HandoffStatus::Aborted);
    assert_eq!(response.reason.as_deref(), Some("invalid_argument"));

    let unknown_region = HandoffRequest {
        ride_id: "R-6".to_string(),
        source: PHOENIX.to_string(),
        target: "Tucson".to_string(),
    };
    let response = cluster.coordinator.handoff(&unknown_region).await;
    assert_eq!(response.reason.as_deref(), Some("invalid_argument"));

    let empty_ride = HandoffRequest {
        ride_id: String::new(),
        source: PHOENIX.to_string(),
        target: LOS_ANGELES.to_string(),
    };
    let response = cluster.coordinator.handoff(&empty_ride).await;
    assert_eq!(response.reason.as_deref(), Some("invalid_argument"));
}

#[tokio::test]
async fn test_missing_ride_aborts_not_found() {
    let cluster = cluster();
    let response = cluster.coordinator.handoff(&handoff_req("R-404")).await;
    assert_eq!(response.status, HandoffStatus::Aborted);
    assert_eq!(response.reason.as_deref(), Some("not_found"));

    let record = cluster
        .log
        .get(&response.tx_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, TxState::Aborted);
}

#[tokio::test]
async fn test_buffer_overflow_rejects() {
    let cluster = cluster();
    mark_unavailable(&cluster, &cluster.los_angeles).await;

    // Capacity is 1000 by default; fill it.
    for i in 0..1000 {
        let response = cluster
            .coordinator
            .handoff(&handoff_req(&format!("R-{i}")))
            .await;
        assert_eq!(response.status, HandoffStatus::Buffered);
    }
    let overflow = cluster.coordinator.handoff(&handoff_req("R-9999")).await;
    assert_eq!(overflow.status, HandoffStatus::Aborted);
    assert_eq!(overflow.reason.as_deref(), Some("buffer_full"));
}
