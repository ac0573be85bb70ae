//! Wire types for both HTTP surfaces and the participant seam.
//!
//! Request bodies reject unknown fields: the original surfaces were
//! loosely-typed dictionaries, and a silently ignored misspelling
//! (`min_fair`) is worse than a 400.
//!
//! [`ParticipantApi`] is the coordinator's view of one region. The
//! production implementation speaks HTTP; tests drive a participant
//! in-process through the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Fault};
use crate::query::{QueryScope, RideFilter};
use crate::ride::{Location, Ride, RideStatus};
use crate::transaction::{Role, TransactionRecord, Vote};

// ── 2PC participant protocol ──

/// Phase 1 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareRequest {
    /// Transaction id the participant keys its idempotency on.
    pub tx_id: String,
    /// Ride being moved.
    pub ride_id: String,
    /// Which side this participant plays.
    pub role: Role,
}

/// Phase 1 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    /// COMMIT or ABORT.
    pub vote: Vote,
    /// Abort classification, when voting ABORT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Fault>,
    /// Source-side snapshot of the locked ride, when voting COMMIT as
    /// `SOURCE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride: Option<Ride>,
}

impl PrepareResponse {
    /// COMMIT vote with an optional snapshot.
    #[must_use]
    pub fn commit(ride: Option<Ride>) -> Self {
        Self {
            vote: Vote::Commit,
            reason: None,
            ride,
        }
    }

    /// ABORT vote with a classification.
    #[must_use]
    pub fn abort(reason: Fault) -> Self {
        Self {
            vote: Vote::Abort,
            reason: Some(reason),
            ride: None,
        }
    }
}

/// Phase 2 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitRequest {
    /// Transaction id.
    pub tx_id: String,
    /// Ride being moved.
    pub ride_id: String,
    /// Which side this participant plays.
    pub role: Role,
    /// Snapshot to install; required for `TARGET`, absent for `SOURCE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride: Option<Ride>,
}

/// Phase 2 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    /// Always true on a 200; the commit either applied or was already
    /// applied by an earlier delivery.
    pub committed: bool,
}

/// Abort request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AbortRequest {
    /// Transaction id.
    pub tx_id: String,
    /// Ride being moved.
    pub ride_id: String,
    /// Which side this participant plays.
    pub role: Role,
}

/// Abort response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    /// Always true on a 200 (abort is idempotent).
    pub aborted: bool,
}

/// Answer to a `status(txId)` recovery probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxStatusResponse {
    /// A document referencing this transaction exists in the region.
    pub present: bool,
    /// That document is locked.
    pub locked: bool,
    /// Best-effort role inference: a locked document is a source-side
    /// lock, an unlocked tagged document is an unfinalized target
    /// insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

// ── Participant CRUD / observability ──

/// Partial ride update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RideUpdate {
    /// New lifecycle status.
    #[serde(default)]
    pub status: Option<RideStatus>,
    /// New vehicle position.
    #[serde(default)]
    pub current_location: Option<Location>,
    /// New destination.
    #[serde(default)]
    pub end_location: Option<Location>,
    /// New fare (same bounds as creation).
    #[serde(default)]
    pub fare: Option<f64>,
}

impl RideUpdate {
    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.current_location.is_none()
            && self.end_location.is_none()
            && self.fare.is_none()
    }
}

/// Regional ride statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionStats {
    /// Region name.
    pub region: String,
    /// Total rides stored.
    pub total_rides: u64,
    /// `IN_PROGRESS` count.
    pub active_rides: u64,
    /// `COMPLETED` count.
    pub completed_rides: u64,
    /// `CANCELLED` count.
    pub cancelled_rides: u64,
    /// Sum of fares.
    pub total_revenue: f64,
    /// Mean fare (0 when empty).
    pub avg_fare: f64,
    /// Store-reported replication lag.
    #[serde(default)]
    pub replication_lag_ms: Option<u64>,
}

/// Participant health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// `"healthy"` or `"unhealthy"`.
    pub status: String,
    /// Region name.
    pub region: String,
    /// Store primary node id.
    #[serde(default)]
    pub primary: Option<String>,
    /// Store replication lag.
    #[serde(default)]
    pub replication_lag_ms: Option<u64>,
    /// Last store write instant.
    #[serde(default)]
    pub last_write_at: Option<DateTime<Utc>>,
}

// ── Coordinator surface ──

/// Request to move one ride between regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffRequest {
    /// Ride to move.
    pub ride_id: String,
    /// Region currently holding the ride.
    pub source: String,
    /// Region that should hold it next.
    pub target: String,
}

/// Outcome classification of a handoff attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffStatus {
    /// Committed; the ride now lives at the target only.
    Success,
    /// Rolled back; the ride stays at the source, unlocked.
    Aborted,
    /// Target region unavailable; queued for the drainer.
    Buffered,
    /// Past `PREPARED` but not terminal; recovery will finish it.
    Partial,
}

/// Handoff response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffResponse {
    /// Outcome classification.
    pub status: HandoffStatus,
    /// Allocated transaction id; absent for buffered and
    /// rejected-before-allocation outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// Wall-clock duration of the attempt.
    pub latency_ms: f64,
    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Search request for `POST /rides/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    /// Consistency scope.
    pub scope: QueryScope,
    /// Target region, required for `local`.
    #[serde(default)]
    pub region: Option<String>,
    /// Status set.
    #[serde(default)]
    pub status: Option<Vec<RideStatus>>,
    /// Inclusive fare lower bound.
    #[serde(default)]
    pub min_fare: Option<f64>,
    /// Inclusive fare upper bound.
    #[serde(default)]
    pub max_fare: Option<f64>,
    /// Inclusive timestamp lower bound.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Inclusive timestamp upper bound.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Maximum results.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    /// Converts to the shared filter, clamping the limit default.
    #[must_use]
    pub fn to_filter(&self) -> RideFilter {
        RideFilter {
            region: self.region.clone(),
            status: self.status.clone(),
            min_fare: self.min_fare,
            max_fare: self.max_fare,
            since: self.since,
            until: self.until,
            limit: self.limit.unwrap_or(50),
        }
    }
}

/// Search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Matching rides in canonical order.
    pub results: Vec<Ride>,
    /// Wall-clock duration.
    pub latency_ms: f64,
    /// Regions consulted (one for local, all for live).
    pub regions_queried: Vec<String>,
    /// Per-region failures that degraded the result to partial.
    pub warnings: Vec<String>,
}

/// Recent-transactions listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsResponse {
    /// Number of records returned.
    pub total: usize,
    /// Records, most recent first.
    pub transactions: Vec<TransactionRecord>,
}

// ── The participant seam ──

/// The coordinator's typed view of one region participant.
///
/// Every method maps 1:1 onto the participant HTTP surface; the local
/// implementation in `waypoint-participant` services the same calls
/// in-process. All 2PC methods are idempotent per transaction id, so
/// the coordinator retries them freely after partial failure.
#[async_trait]
pub trait ParticipantApi: Send + Sync {
    /// Phase 1 vote collection.
    async fn prepare(&self, req: &PrepareRequest) -> Result<PrepareResponse, ApiError>;

    /// Phase 2 apply.
    async fn commit(&self, req: &CommitRequest) -> Result<CommitResponse, ApiError>;

    /// Roll back whatever this participant did for the transaction.
    async fn abort(&self, req: &AbortRequest) -> Result<AbortResponse, ApiError>;

    /// Recovery probe: what does this region hold for a transaction?
    async fn tx_status(&self, tx_id: &str) -> Result<TxStatusResponse, ApiError>;

    /// Store health probe.
    async fn health(&self) -> Result<HealthReport, ApiError>;

    /// Regional statistics.
    async fn stats(&self) -> Result<RegionStats, ApiError>;

    /// Filtered ride listing (the router's read endpoint).
    async fn list_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_rejected() {
        let body = r#"{"ride_id":"R-1","source":"Phoenix","target":"Los Angeles","extra":1}"#;
        assert!(serde_json::from_str::<HandoffRequest>(body).is_err());

        let body = r#"{"scope":"local","min_fair":10.0}"#;
        assert!(serde_json::from_str::<SearchRequest>(body).is_err());
    }

    #[test]
    fn test_scope_wire_names() {
        let req: SearchRequest = serde_json::from_str(r#"{"scope":"global-live"}"#).unwrap();
        assert_eq!(req.scope, QueryScope::GlobalLive);
        let req: SearchRequest = serde_json::from_str(r#"{"scope":"global-fast"}"#).unwrap();
        assert_eq!(req.scope, QueryScope::GlobalFast);
    }

    #[test]
    fn test_prepare_response_constructors() {
        let resp = PrepareResponse::abort(Fault::Contested);
        assert_eq!(resp.vote, Vote::Abort);
        assert_eq!(resp.reason, Some(Fault::Contested));

        let resp = PrepareResponse::commit(None);
        assert_eq!(resp.vote, Vote::Commit);
        assert!(resp.reason.is_none());
    }

    #[test]
    fn test_handoff_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&HandoffStatus::Buffered).unwrap(),
            "\"BUFFERED\""
        );
        assert_eq!(
            serde_json::to_string(&HandoffStatus::Partial).unwrap(),
            "\"PARTIAL\""
        );
    }
}
