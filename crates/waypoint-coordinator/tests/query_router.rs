//! Query router scopes over an in-process cluster:
//!
//! - `local` answers from one region only, deterministically ordered;
//! - `global-fast` answers from the replica;
//! - `global-live` merges all regions, deduplicates by ride id
//!   preferring the newer copy, and degrades to partial results with
//!   warnings when a region is down.

mod common;

use std::sync::Arc;

use common::{cluster, cluster_with_log, ride, LOS_ANGELES, PHOENIX};
use waypoint_core::api::{ParticipantApi, SearchRequest};
use waypoint_core::query::QueryScope;
use waypoint_core::ride::RideStatus;
use waypoint_participant::Participant;
use waypoint_storage::{MemoryRegionStore, MemoryTransactionLog, RegionStore};

fn search(scope: QueryScope) -> SearchRequest {
    SearchRequest {
        scope,
        region: None,
        status: None,
        min_fare: None,
        max_fare: None,
        since: None,
        until: None,
        limit: None,
    }
}

async fn seed(cluster: &common::Cluster) {
    for (id, fare, ts) in [("R-100", 10.0, 100), ("R-101", 20.0, 300)] {
        cluster
            .phoenix
            .insert_ride(ride(id, PHOENIX, fare, ts))
            .await
            .unwrap();
    }
    for (id, fare, ts) in [("R-200", 30.0, 200), ("R-201", 40.0, 400)] {
        cluster
            .los_angeles
            .insert_ride(ride(id, LOS_ANGELES, fare, ts))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_local_scope_requires_and_respects_region() {
    let cluster = cluster();
    seed(&cluster).await;

    let missing_region = cluster.coordinator.search(&search(QueryScope::Local)).await;
    assert!(missing_region.is_err());

    let mut req = search(QueryScope::Local);
    req.region = Some(PHOENIX.to_string());
    let response = cluster.coordinator.search(&req).await.unwrap();
    assert_eq!(response.regions_queried, vec![PHOENIX.to_string()]);
    let ids: Vec<&str> = response.results.iter().map(|r| r.ride_id.as_str()).collect();
    // Timestamp descending.
    assert_eq!(ids, ["R-101", "R-100"]);
    assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn test_local_scope_is_deterministic() {
    let cluster = cluster();
    seed(&cluster).await;

    let mut req = search(QueryScope::Local);
    req.region = Some(LOS_ANGELES.to_string());
    let first = cluster.coordinator.search(&req).await.unwrap();
    let second = cluster.coordinator.search(&req).await.unwrap();
    assert_eq!(first.results, second.results);
}

#[tokio::test]
async fn test_global_live_merges_and_sorts() {
    let cluster = cluster();
    seed(&cluster).await;

    let response = cluster
        .coordinator
        .search(&search(QueryScope::GlobalLive))
        .await
        .unwrap();
    let ids: Vec<&str> = response.results.iter().map(|r| r.ride_id.as_str()).collect();
    assert_eq!(ids, ["R-201", "R-101", "R-200", "R-100"]);
    assert_eq!(response.regions_queried.len(), 2);
    assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn test_global_live_applies_filters() {
    let cluster = cluster();
    seed(&cluster).await;

    let mut req = search(QueryScope::GlobalLive);
    req.min_fare = Some(25.0);
    req.status = Some(vec![RideStatus::InProgress]);
    req.limit = Some(1);
    let response = cluster.coordinator.search(&req).await.unwrap();
    let ids: Vec<&str> = response.results.iter().map(|r| r.ride_id.as_str()).collect();
    assert_eq!(ids, ["R-201"]);
}

#[tokio::test]
async fn test_global_live_dedups_by_newer_timestamp() {
    let cluster = cluster();
    // The same ride visible in both regions (mid-handoff duplicate
    // window): the router must keep the newer copy.
    cluster
        .phoenix
        .insert_ride(ride("R-300", PHOENIX, 15.0, 100))
        .await
        .unwrap();
    cluster
        .los_angeles
        .insert_ride(ride("R-300", LOS_ANGELES, 15.0, 500))
        .await
        .unwrap();

    let response = cluster
        .coordinator
        .search(&search(QueryScope::GlobalLive))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].region, LOS_ANGELES);
}

#[tokio::test]
async fn test_global_live_partial_results_with_warnings() {
    let cluster = cluster();
    seed(&cluster).await;
    cluster.los_angeles.set_available(false);

    let response = cluster
        .coordinator
        .search(&search(QueryScope::GlobalLive))
        .await
        .unwrap();
    let ids: Vec<&str> = response.results.iter().map(|r| r.ride_id.as_str()).collect();
    assert_eq!(ids, ["R-101", "R-100"]);
    assert_eq!(response.warnings.len(), 1);
    assert!(response.warnings[0].contains(LOS_ANGELES));
}

#[tokio::test]
async fn test_global_live_fails_only_when_all_fail() {
    let cluster = cluster();
    seed(&cluster).await;
    cluster.phoenix.set_available(false);
    cluster.los_angeles.set_available(false);

    let result = cluster
        .coordinator
        .search(&search(QueryScope::GlobalLive))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_global_fast_reads_replica() {
    // The replica holds the eventually-consistent union, fed by the
    // change-feed bridge outside this layer.
    let replica_store = Arc::new(MemoryRegionStore::new("global"));
    let replica: Arc<dyn ParticipantApi> = Arc::new(Participant::new(
        "global",
        replica_store.clone() as Arc<dyn RegionStore>,
    ));
    let cluster = cluster_with_log(Arc::new(MemoryTransactionLog::new()), Some(replica));

    replica_store
        .insert_ride(ride("R-400", "global", 12.0, 100))
        .await
        .unwrap();
    replica_store
        .insert_ride(ride("R-401", "global", 14.0, 200))
        .await
        .unwrap();

    let response = cluster
        .coordinator
        .search(&search(QueryScope::GlobalFast))
        .await
        .unwrap();
    let ids: Vec<&str> = response.results.iter().map(|r| r.ride_id.as_str()).collect();
    assert_eq!(ids, ["R-401", "R-400"]);
    assert_eq!(response.regions_queried, vec!["global-replica".to_string()]);
}

#[tokio::test]
async fn test_global_fast_without_replica_is_unavailable() {
    let cluster = cluster();
    let result = cluster
        .coordinator
        .search(&search(QueryScope::GlobalFast))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_limit_bounds_rejected() {
    let cluster = cluster();
    let mut req = search(QueryScope::GlobalLive);
    req.limit = Some(0);
    assert!(cluster.coordinator.search(&req).await.is_err());
    req.limit = Some(1001);
    assert!(cluster.coordinator.search(&req).await.is_err());
}
