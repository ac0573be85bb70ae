//! Region participant: CRUD plus the 2PC participant protocol.
//!
//! Idempotence is a contract here, not an optimization. The coordinator
//! retries every call after partial failure with the same transaction
//! id, so each operation must be safe under duplicate delivery:
//!
//! - a replayed source `prepare` finds the ride already locked by its
//!   own transaction and re-issues the same COMMIT vote;
//! - a replayed source `commit` finds the ride already deleted and
//!   reports success;
//! - a replayed target `commit` finds the ride already installed and
//!   reports success;
//! - `abort` treats "not owning that document" as success on both
//!   sides.
//!
//! A lock is never released by a timeout — only by an explicit `abort`
//! or by coordinator recovery replaying the log.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use waypoint_core::api::{
    AbortRequest, AbortResponse, CommitRequest, CommitResponse, HealthReport, ParticipantApi,
    PrepareRequest, PrepareResponse, RegionStats, RideUpdate, TxStatusResponse,
};
use waypoint_core::error::{ApiError, Fault};
use waypoint_core::query::RideFilter;
use waypoint_core::ride::{round_fare, validate_fare, HandoffStage, Ride};
use waypoint_core::transaction::Role;
use waypoint_storage::{RegionStore, StoreError};

/// Errors surfaced by participant operations.
///
/// Protocol-level refusals (contested, duplicate, …) are not errors:
/// they travel inside [`PrepareResponse`] votes. This enum covers the
/// CRUD surface and genuine failures.
#[derive(Debug, thiserror::Error)]
pub enum ParticipantError {
    /// Request failed validation.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Store refused the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ParticipantError {
    fn to_api_error(&self) -> ApiError {
        match self {
            Self::Invalid(msg) => ApiError::Rejected {
                status: 400,
                message: msg.clone(),
            },
            Self::Store(StoreError::Unavailable(msg)) => ApiError::Unavailable(msg.clone()),
            Self::Store(StoreError::NotFound) => ApiError::Rejected {
                status: 404,
                message: "ride not found".to_string(),
            },
            Self::Store(e) => ApiError::Rejected {
                status: 409,
                message: e.to_string(),
            },
        }
    }
}

/// One region's participant.
pub struct Participant {
    region: String,
    store: Arc<dyn RegionStore>,
}

impl Participant {
    /// Creates a participant over a region store.
    #[must_use]
    pub fn new(region: impl Into<String>, store: Arc<dyn RegionStore>) -> Self {
        Self {
            region: region.into(),
            store,
        }
    }

    /// Region name served by this participant.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RegionStore> {
        &self.store
    }

    // ── CRUD surface ──

    /// Creates a ride in this region.
    ///
    /// # Errors
    ///
    /// [`ParticipantError::Invalid`] on validation failure or a region
    /// mismatch; [`StoreError::AlreadyExists`] on a duplicate ride id.
    pub async fn create_ride(&self, mut ride: Ride) -> Result<Ride, ParticipantError> {
        ride.validate().map_err(|e| ParticipantError::Invalid(e.to_string()))?;
        if ride.region != self.region {
            return Err(ParticipantError::Invalid(format!(
                "ride region '{}' does not match this region '{}'",
                ride.region, self.region
            )));
        }
        // Handoff metadata is owned by the protocol, never by clients.
        ride.locked = false;
        ride.transaction_id = None;
        ride.handoff_status = None;
        ride.fare = round_fare(ride.fare);

        self.store.insert_ride(ride.clone()).await?;
        info!(ride_id = %ride.ride_id, region = %self.region, "ride created");
        Ok(ride)
    }

    /// Fetches a ride.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when absent.
    pub async fn get_ride(&self, ride_id: &str) -> Result<Ride, ParticipantError> {
        Ok(self.store.get_ride(ride_id).await?)
    }

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// [`ParticipantError::Invalid`] on an empty update or a bad fare;
    /// [`StoreError::NotFound`] when absent.
    pub async fn update_ride(
        &self,
        ride_id: &str,
        update: &RideUpdate,
    ) -> Result<Ride, ParticipantError> {
        if update.is_empty() {
            return Err(ParticipantError::Invalid("no fields to update".to_string()));
        }
        if let Some(fare) = update.fare {
            validate_fare(fare).map_err(|e| ParticipantError::Invalid(e.to_string()))?;
        }
        let updated = self.store.apply_update(ride_id, update).await?;
        info!(ride_id, region = %self.region, "ride updated");
        Ok(updated)
    }

    /// Deletes a ride (CRUD surface; refuses rides locked by an
    /// in-flight handoff).
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when absent, [`StoreError::AlreadyLocked`]
    /// when mid-handoff.
    pub async fn delete_ride(&self, ride_id: &str) -> Result<(), ParticipantError> {
        self.store.remove_ride(ride_id).await?;
        info!(ride_id, region = %self.region, "ride deleted");
        Ok(())
    }

    /// Filtered listing in canonical order.
    ///
    /// # Errors
    ///
    /// [`ParticipantError::Invalid`] on a bad filter.
    pub async fn list_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, ParticipantError> {
        filter
            .validate()
            .map_err(|e| ParticipantError::Invalid(e.to_string()))?;
        Ok(self.store.list(filter).await?)
    }

    /// Regional statistics.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store is down.
    pub async fn stats(&self) -> Result<RegionStats, ParticipantError> {
        Ok(self.store.stats().await?)
    }

    /// Health probe.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store is down.
    pub async fn health(&self) -> Result<HealthReport, ParticipantError> {
        let health = self.store.health().await?;
        Ok(HealthReport {
            status: "healthy".to_string(),
            region: self.region.clone(),
            primary: Some(health.primary),
            replication_lag_ms: Some(health.replication_lag_ms),
            last_write_at: health.last_write_at,
        })
    }

    // ── 2PC protocol ──

    /// Phase 1: vote on a transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store is down; every
    /// protocol refusal is an ABORT vote, not an error.
    pub async fn prepare(&self, req: &PrepareRequest) -> Result<PrepareResponse, ParticipantError> {
        match req.role {
            Role::Source => self.prepare_source(req).await,
            Role::Target => self.prepare_target(req).await,
        }
    }

    async fn prepare_source(
        &self,
        req: &PrepareRequest,
    ) -> Result<PrepareResponse, ParticipantError> {
        match self.store.lock(&req.ride_id, &req.tx_id).await {
            Ok(snapshot) => {
                info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "source prepared, ride locked");
                Ok(PrepareResponse::commit(Some(snapshot)))
            }
            Err(StoreError::NotFound) => {
                warn!(tx_id = %req.tx_id, ride_id = %req.ride_id, "source prepare: ride not found");
                Ok(PrepareResponse::abort(Fault::NotFound))
            }
            Err(StoreError::AlreadyLocked) => {
                // Replay by the same transaction re-issues its vote;
                // anyone else lost the CAS.
                match self.store.get_ride(&req.ride_id).await {
                    Ok(existing) if existing.locked_by(&req.tx_id) => {
                        info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "source prepare replayed");
                        Ok(PrepareResponse::commit(Some(existing)))
                    }
                    Ok(_) => {
                        warn!(tx_id = %req.tx_id, ride_id = %req.ride_id, "source prepare: contested");
                        Ok(PrepareResponse::abort(Fault::Contested))
                    }
                    // The holder committed between our CAS and this read.
                    Err(StoreError::NotFound) => Ok(PrepareResponse::abort(Fault::NotFound)),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn prepare_target(
        &self,
        req: &PrepareRequest,
    ) -> Result<PrepareResponse, ParticipantError> {
        match self.store.get_ride(&req.ride_id).await {
            Ok(existing) => {
                if existing.references_tx(&req.tx_id) {
                    // A prior delivery of this transaction already
                    // installed the document.
                    info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "target prepare replayed");
                    Ok(PrepareResponse::commit(None))
                } else {
                    warn!(tx_id = %req.tx_id, ride_id = %req.ride_id, "target prepare: duplicate");
                    Ok(PrepareResponse::abort(Fault::Duplicate))
                }
            }
            Err(StoreError::NotFound) => {
                info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "target prepared");
                Ok(PrepareResponse::commit(None))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Phase 2: apply the transaction.
    ///
    /// # Errors
    ///
    /// [`ParticipantError::Invalid`] when a target commit carries no
    /// snapshot; [`StoreError`] on store conflicts or unavailability.
    pub async fn commit(&self, req: &CommitRequest) -> Result<CommitResponse, ParticipantError> {
        match req.role {
            Role::Source => self.commit_source(req).await,
            Role::Target => self.commit_target(req).await,
        }
    }

    async fn commit_source(&self, req: &CommitRequest) -> Result<CommitResponse, ParticipantError> {
        match self.store.delete_ride(&req.ride_id, &req.tx_id).await {
            Ok(()) => {
                info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "source committed, ride deleted");
                Ok(CommitResponse { committed: true })
            }
            // Already deleted by an earlier delivery.
            Err(StoreError::NotFound) => {
                info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "source commit replayed");
                Ok(CommitResponse { committed: true })
            }
            // The document present now belongs to someone else; our
            // delete already happened.
            Err(StoreError::WrongTransaction) => {
                warn!(
                    tx_id = %req.tx_id,
                    ride_id = %req.ride_id,
                    "source commit: ride re-owned by a later transaction"
                );
                Ok(CommitResponse { committed: true })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit_target(&self, req: &CommitRequest) -> Result<CommitResponse, ParticipantError> {
        let snapshot = req.ride.as_ref().ok_or_else(|| {
            ParticipantError::Invalid("target commit requires a ride snapshot".to_string())
        })?;

        let mut install = snapshot.clone();
        install.region = self.region.clone();
        install.locked = false;
        install.transaction_id = Some(req.tx_id.clone());
        install.handoff_status = Some(HandoffStage::Preparing);

        match self.store.insert_ride(install).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                let existing = self.store.get_ride(&req.ride_id).await?;
                if existing.region != self.region {
                    return Err(StoreError::AlreadyExists.into());
                }
                if !existing.references_tx(&req.tx_id) {
                    // Installed and finalized by an earlier delivery, or
                    // the ride legitimately lives here already.
                    info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "target commit replayed");
                    return Ok(CommitResponse { committed: true });
                }
                // Inserted but not yet finalized; fall through.
            }
            Err(e) => return Err(e.into()),
        }

        match self.store.finalize(&req.ride_id, &req.tx_id).await {
            Ok(()) | Err(StoreError::WrongTransaction) => {
                info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "target committed, ride installed");
                Ok(CommitResponse { committed: true })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rolls back this participant's part of the transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store is down.
    pub async fn abort(&self, req: &AbortRequest) -> Result<AbortResponse, ParticipantError> {
        match req.role {
            Role::Source => match self.store.unlock(&req.ride_id, &req.tx_id).await {
                Ok(()) => {
                    info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "source aborted, lock released");
                    Ok(AbortResponse { aborted: true })
                }
                // Not owning that document is success for an abort.
                Err(StoreError::NotFound | StoreError::WrongTransaction) => {
                    Ok(AbortResponse { aborted: true })
                }
                Err(e) => Err(e.into()),
            },
            Role::Target => {
                let deleted = self.store.delete_tentative(&req.tx_id).await?;
                if deleted {
                    info!(tx_id = %req.tx_id, ride_id = %req.ride_id, "target aborted, tentative insert removed");
                }
                Ok(AbortResponse { aborted: true })
            }
        }
    }

    /// Recovery probe: what does this region hold for a transaction?
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store is down.
    pub async fn tx_status(&self, tx_id: &str) -> Result<TxStatusResponse, ParticipantError> {
        match self.store.find_by_tx(tx_id).await? {
            Some(doc) => Ok(TxStatusResponse {
                present: true,
                locked: doc.locked,
                role: Some(if doc.locked { Role::Source } else { Role::Target }),
            }),
            None => Ok(TxStatusResponse {
                present: false,
                locked: false,
                role: None,
            }),
        }
    }
}

#[async_trait]
impl ParticipantApi for Participant {
    async fn prepare(&self, req: &PrepareRequest) -> Result<PrepareResponse, ApiError> {
        Participant::prepare(self, req)
            .await
            .map_err(|e| e.to_api_error())
    }

    async fn commit(&self, req: &CommitRequest) -> Result<CommitResponse, ApiError> {
        Participant::commit(self, req)
            .await
            .map_err(|e| e.to_api_error())
    }

    async fn abort(&self, req: &AbortRequest) -> Result<AbortResponse, ApiError> {
        Participant::abort(self, req)
            .await
            .map_err(|e| e.to_api_error())
    }

    async fn tx_status(&self, tx_id: &str) -> Result<TxStatusResponse, ApiError> {
        Participant::tx_status(self, tx_id)
            .await
            .map_err(|e| e.to_api_error())
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        Participant::health(self).await.map_err(|e| e.to_api_error())
    }

    async fn stats(&self) -> Result<RegionStats, ApiError> {
        Participant::stats(self).await.map_err(|e| e.to_api_error())
    }

    async fn list_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, ApiError> {
        Participant::list_rides(self, filter)
            .await
            .map_err(|e| e.to_api_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use waypoint_core::ride::{Location, RideStatus};
    use waypoint_core::transaction::Vote;
    use waypoint_storage::MemoryRegionStore;

    fn participant(region: &str) -> (Participant, Arc<MemoryRegionStore>) {
        let store = Arc::new(MemoryRegionStore::new(region));
        (
            Participant::new(region, store.clone() as Arc<dyn RegionStore>),
            store,
        )
    }

    fn ride(id: &str, region: &str) -> Ride {
        Ride {
            ride_id: id.to_string(),
            vehicle_id: "AV-1001".to_string(),
            customer_id: "C-1001".to_string(),
            status: RideStatus::InProgress,
            region: region.to_string(),
            fare: 22.5,
            start_location: Location { lat: 33.4, lon: -112.0 },
            current_location: Location { lat: 33.5, lon: -112.1 },
            end_location: Location { lat: 33.6, lon: -112.2 },
            timestamp: Utc::now(),
            handoff_status: None,
            locked: false,
            transaction_id: None,
        }
    }

    fn prepare_req(tx: &str, ride: &str, role: Role) -> PrepareRequest {
        PrepareRequest {
            tx_id: tx.to_string(),
            ride_id: ride.to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_region_mismatch() {
        let (p, _) = participant("Phoenix");
        let err = p.create_ride(ride("R-1", "Los Angeles")).await.unwrap_err();
        assert!(matches!(err, ParticipantError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_create_strips_handoff_metadata() {
        let (p, _) = participant("Phoenix");
        let mut r = ride("R-1", "Phoenix");
        r.locked = true;
        r.transaction_id = Some("tx-evil".to_string());
        let created = p.create_ride(r).await.unwrap();
        assert!(!created.locked);
        assert!(created.transaction_id.is_none());
    }

    #[tokio::test]
    async fn test_prepare_source_votes_and_replays() {
        let (p, _) = participant("Phoenix");
        p.create_ride(ride("R-1", "Phoenix")).await.unwrap();

        let first = p.prepare(&prepare_req("tx-a", "R-1", Role::Source)).await.unwrap();
        assert_eq!(first.vote, Vote::Commit);
        assert!(first.ride.as_ref().unwrap().locked);

        // Duplicate delivery returns the same vote.
        let replay = p.prepare(&prepare_req("tx-a", "R-1", Role::Source)).await.unwrap();
        assert_eq!(replay.vote, Vote::Commit);

        // A competing transaction is refused.
        let contested = p.prepare(&prepare_req("tx-b", "R-1", Role::Source)).await.unwrap();
        assert_eq!(contested.vote, Vote::Abort);
        assert_eq!(contested.reason, Some(Fault::Contested));
    }

    #[tokio::test]
    async fn test_prepare_source_not_found() {
        let (p, _) = participant("Phoenix");
        let resp = p.prepare(&prepare_req("tx-a", "R-404", Role::Source)).await.unwrap();
        assert_eq!(resp.vote, Vote::Abort);
        assert_eq!(resp.reason, Some(Fault::NotFound));
    }

    #[tokio::test]
    async fn test_prepare_target_duplicate() {
        let (p, _) = participant("Los Angeles");
        p.create_ride(ride("R-1", "Los Angeles")).await.unwrap();

        let resp = p.prepare(&prepare_req("tx-a", "R-1", Role::Target)).await.unwrap();
        assert_eq!(resp.vote, Vote::Abort);
        assert_eq!(resp.reason, Some(Fault::Duplicate));
    }

    #[tokio::test]
    async fn test_commit_target_installs_and_replays() {
        let (p, store) = participant("Los Angeles");
        let snapshot = ride("R-1", "Phoenix");

        let req = CommitRequest {
            tx_id: "tx-a".to_string(),
            ride_id: "R-1".to_string(),
            role: Role::Target,
            ride: Some(snapshot),
        };
        p.commit(&req).await.unwrap();

        let installed = store.get_ride("R-1").await.unwrap();
        assert_eq!(installed.region, "Los Angeles");
        assert!(!installed.locked);
        assert!(installed.transaction_id.is_none());
        assert_eq!(installed.handoff_status, Some(HandoffStage::Completed));

        // Duplicate delivery leaves the same document state.
        p.commit(&req).await.unwrap();
        let after_replay = store.get_ride("R-1").await.unwrap();
        assert_eq!(after_replay, installed);
    }

    #[tokio::test]
    async fn test_commit_source_deletes_and_replays() {
        let (p, store) = participant("Phoenix");
        p.create_ride(ride("R-1", "Phoenix")).await.unwrap();
        p.prepare(&prepare_req("tx-a", "R-1", Role::Source)).await.unwrap();

        let req = CommitRequest {
            tx_id: "tx-a".to_string(),
            ride_id: "R-1".to_string(),
            role: Role::Source,
            ride: None,
        };
        p.commit(&req).await.unwrap();
        assert!(store.get_ride("R-1").await.is_err());

        // Duplicate delivery is success.
        let replay = p.commit(&req).await.unwrap();
        assert!(replay.committed);
    }

    #[tokio::test]
    async fn test_abort_source_releases_lock_idempotently() {
        let (p, store) = participant("Phoenix");
        p.create_ride(ride("R-1", "Phoenix")).await.unwrap();
        p.prepare(&prepare_req("tx-a", "R-1", Role::Source)).await.unwrap();

        let req = AbortRequest {
            tx_id: "tx-a".to_string(),
            ride_id: "R-1".to_string(),
            role: Role::Source,
        };
        p.abort(&req).await.unwrap();
        let doc = store.get_ride("R-1").await.unwrap();
        assert!(!doc.locked);

        // Replay and foreign-transaction aborts are also success.
        p.abort(&req).await.unwrap();
        let foreign = AbortRequest {
            tx_id: "tx-z".to_string(),
            ride_id: "R-1".to_string(),
            role: Role::Source,
        };
        p.abort(&foreign).await.unwrap();
        assert!(!store.get_ride("R-1").await.unwrap().locked);
    }

    #[tokio::test]
    async fn test_abort_target_removes_only_own_tentative_insert() {
        let (p, store) = participant("Los Angeles");
        let req = CommitRequest {
            tx_id: "tx-a".to_string(),
            ride_id: "R-1".to_string(),
            role: Role::Target,
            ride: Some(ride("R-1", "Phoenix")),
        };
        p.commit(&req).await.unwrap();

        // The commit finalized the document, so the abort must not
        // delete it (its transaction tag is cleared).
        p.abort(&AbortRequest {
            tx_id: "tx-a".to_string(),
            ride_id: "R-1".to_string(),
            role: Role::Target,
        })
        .await
        .unwrap();
        assert!(store.get_ride("R-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_tx_status_probe() {
        let (p, _) = participant("Phoenix");
        p.create_ride(ride("R-1", "Phoenix")).await.unwrap();

        let empty = p.tx_status("tx-a").await.unwrap();
        assert!(!empty.present);

        p.prepare(&prepare_req("tx-a", "R-1", Role::Source)).await.unwrap();
        let held = p.tx_status("tx-a").await.unwrap();
        assert!(held.present);
        assert!(held.locked);
        assert_eq!(held.role, Some(Role::Source));
    }
}
