//! The region store client contract.
//!
//! Every operation is logically atomic at the document level. The CAS on
//! [`lock`](RegionStore::lock) is the invariant source for the whole
//! protocol: concurrent handoff attempts against the same ride serialize
//! on it, and at most one observes success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use waypoint_core::api::{RegionStats, RideUpdate};
use waypoint_core::query::RideFilter;
use waypoint_core::ride::Ride;

/// Errors from region store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No document with the requested ride id.
    #[error("ride not found")]
    NotFound,

    /// Insert refused: a document with this ride id already exists.
    #[error("ride already exists")]
    AlreadyExists,

    /// Lock CAS refused: the document is locked.
    #[error("ride already locked")]
    AlreadyLocked,

    /// Guarded operation refused: the document's `transaction_id` does
    /// not match the caller's.
    #[error("document owned by a different transaction")]
    WrongTransaction,

    /// The store could not be reached after the client's bounded
    /// retries.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Store health snapshot returned by [`RegionStore::health`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    /// Identity of the store's primary node.
    pub primary: String,
    /// Replication lag behind the primary.
    pub replication_lag_ms: u64,
    /// Instant of the last accepted write.
    pub last_write_at: Option<DateTime<Utc>>,
}

/// Typed client for one region's document store.
///
/// The first group of methods is the handoff contract; the second group
/// carries the CRUD, query, and observability surface the participant
/// exposes over HTTP.
#[async_trait]
pub trait RegionStore: Send + Sync {
    /// Name of the region this store holds.
    fn region(&self) -> &str;

    // ── Handoff contract ──

    /// Fetches a document by ride id.
    async fn get_ride(&self, ride_id: &str) -> Result<Ride, StoreError>;

    /// Inserts a document; uniqueness on ride id.
    async fn insert_ride(&self, ride: Ride) -> Result<(), StoreError>;

    /// Deletes the document only if its `transaction_id` matches.
    async fn delete_ride(&self, ride_id: &str, tx_id: &str) -> Result<(), StoreError>;

    /// Compare-and-set lock: succeeds only when `locked == false`; sets
    /// `locked`, `transaction_id`, and `handoff_status = PREPARING`.
    /// Returns the locked document as the transaction's snapshot.
    async fn lock(&self, ride_id: &str, tx_id: &str) -> Result<Ride, StoreError>;

    /// Inverse CAS: clears the lock fields only when `transaction_id`
    /// matches.
    async fn unlock(&self, ride_id: &str, tx_id: &str) -> Result<(), StoreError>;

    /// Clears the lock fields and marks `handoff_status = COMPLETED`;
    /// the target side's last step of a commit.
    async fn finalize(&self, ride_id: &str, tx_id: &str) -> Result<(), StoreError>;

    /// Finds the document referencing a transaction, if any (recovery
    /// probes and the abort path use this).
    async fn find_by_tx(&self, tx_id: &str) -> Result<Option<Ride>, StoreError>;

    /// Deletes an unfinalized document tagged with this transaction.
    /// Never touches documents owned by other transactions. Returns
    /// whether anything was deleted.
    async fn delete_tentative(&self, tx_id: &str) -> Result<bool, StoreError>;

    // ── CRUD / query / observability surface ──

    /// Unguarded delete for the CRUD surface. Refuses documents locked
    /// by an in-flight handoff.
    async fn remove_ride(&self, ride_id: &str) -> Result<(), StoreError>;

    /// Applies a partial update and refreshes the timestamp.
    async fn apply_update(&self, ride_id: &str, update: &RideUpdate) -> Result<Ride, StoreError>;

    /// Filtered listing in canonical order.
    async fn list(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError>;

    /// Regional statistics.
    async fn stats(&self) -> Result<RegionStats, StoreError>;

    /// Store health probe.
    async fn health(&self) -> Result<StoreHealth, StoreError>;
}
