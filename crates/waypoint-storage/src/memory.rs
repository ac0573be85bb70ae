//! In-memory region store.
//!
//! Holds every document under a single map lock, which trivially gives
//! the document-level atomicity the contract demands. The availability
//! toggle lets tests and the simulator take a region down without
//! killing the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use waypoint_core::api::{RegionStats, RideUpdate};
use waypoint_core::query::{sort_rides, RideFilter};
use waypoint_core::ride::{round_fare, HandoffStage, Ride};

use crate::store::{RegionStore, StoreError, StoreHealth};

/// In-memory implementation of [`RegionStore`].
pub struct MemoryRegionStore {
    region: String,
    primary: String,
    docs: RwLock<HashMap<String, Ride>>,
    available: AtomicBool,
    last_write_at: RwLock<Option<DateTime<Utc>>>,
}

impl MemoryRegionStore {
    /// Creates an empty store for a region.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let primary = format!("{}-primary-1", region.to_lowercase().replace(' ', "-"));
        Self {
            region,
            primary,
            docs: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            last_write_at: RwLock::new(None),
        }
    }

    /// Toggles simulated availability. While unavailable every
    /// operation returns [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of documents held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// True when no documents are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "{} store is offline",
                self.region
            )))
        }
    }

    fn touch(&self) {
        *self.last_write_at.write() = Some(Utc::now());
    }
}

#[async_trait]
impl RegionStore for MemoryRegionStore {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_ride(&self, ride_id: &str) -> Result<Ride, StoreError> {
        self.check_available()?;
        self.docs
            .read()
            .get(ride_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_ride(&self, ride: Ride) -> Result<(), StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        if docs.contains_key(&ride.ride_id) {
            return Err(StoreError::AlreadyExists);
        }
        docs.insert(ride.ride_id.clone(), ride);
        drop(docs);
        self.touch();
        Ok(())
    }

    async fn delete_ride(&self, ride_id: &str, tx_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        match docs.get(ride_id) {
            None => Err(StoreError::NotFound),
            Some(doc) if !doc.references_tx(tx_id) => Err(StoreError::WrongTransaction),
            Some(_) => {
                docs.remove(ride_id);
                drop(docs);
                self.touch();
                Ok(())
            }
        }
    }

    async fn lock(&self, ride_id: &str, tx_id: &str) -> Result<Ride, StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        let doc = docs.get_mut(ride_id).ok_or(StoreError::NotFound)?;
        if doc.locked {
            return Err(StoreError::AlreadyLocked);
        }
        doc.locked = true;
        doc.transaction_id = Some(tx_id.to_string());
        doc.handoff_status = Some(HandoffStage::Preparing);
        let snapshot = doc.clone();
        drop(docs);
        self.touch();
        Ok(snapshot)
    }

    async fn unlock(&self, ride_id: &str, tx_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        let doc = docs.get_mut(ride_id).ok_or(StoreError::NotFound)?;
        if !doc.references_tx(tx_id) {
            return Err(StoreError::WrongTransaction);
        }
        doc.locked = false;
        doc.transaction_id = None;
        doc.handoff_status = None;
        drop(docs);
        self.touch();
        Ok(())
    }

    async fn finalize(&self, ride_id: &str, tx_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        let doc = docs.get_mut(ride_id).ok_or(StoreError::NotFound)?;
        if !doc.references_tx(tx_id) {
            return Err(StoreError::WrongTransaction);
        }
        doc.locked = false;
        doc.transaction_id = None;
        doc.handoff_status = Some(HandoffStage::Completed);
        drop(docs);
        self.touch();
        Ok(())
    }

    async fn find_by_tx(&self, tx_id: &str) -> Result<Option<Ride>, StoreError> {
        self.check_available()?;
        Ok(self
            .docs
            .read()
            .values()
            .find(|doc| doc.references_tx(tx_id))
            .cloned())
    }

    async fn delete_tentative(&self, tx_id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        let tentative: Option<String> = docs
            .values()
            .find(|doc| doc.references_tx(tx_id) && !doc.locked)
            .map(|doc| doc.ride_id.clone());
        let deleted = match tentative {
            Some(id) => {
                docs.remove(&id);
                true
            }
            None => false,
        };
        drop(docs);
        if deleted {
            self.touch();
        }
        Ok(deleted)
    }

    async fn remove_ride(&self, ride_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        match docs.get(ride_id) {
            None => Err(StoreError::NotFound),
            Some(doc) if doc.locked => Err(StoreError::AlreadyLocked),
            Some(_) => {
                docs.remove(ride_id);
                drop(docs);
                self.touch();
                Ok(())
            }
        }
    }

    async fn apply_update(&self, ride_id: &str, update: &RideUpdate) -> Result<Ride, StoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        let doc = docs.get_mut(ride_id).ok_or(StoreError::NotFound)?;
        if let Some(status) = update.status {
            doc.status = status;
        }
        if let Some(loc) = update.current_location {
            doc.current_location = loc;
        }
        if let Some(loc) = update.end_location {
            doc.end_location = loc;
        }
        if let Some(fare) = update.fare {
            doc.fare = round_fare(fare);
        }
        doc.timestamp = Utc::now();
        let updated = doc.clone();
        drop(docs);
        self.touch();
        Ok(updated)
    }

    async fn list(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError> {
        self.check_available()?;
        let mut rides: Vec<Ride> = self
            .docs
            .read()
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect();
        sort_rides(&mut rides);
        rides.truncate(filter.limit);
        Ok(rides)
    }

    async fn stats(&self) -> Result<RegionStats, StoreError> {
        self.check_available()?;
        let docs = self.docs.read();
        let total = docs.len() as u64;
        let mut active = 0u64;
        let mut completed = 0u64;
        let mut cancelled = 0u64;
        let mut revenue = 0.0f64;
        for doc in docs.values() {
            match doc.status {
                waypoint_core::ride::RideStatus::InProgress => active += 1,
                waypoint_core::ride::RideStatus::Completed => completed += 1,
                waypoint_core::ride::RideStatus::Cancelled => cancelled += 1,
            }
            revenue += doc.fare;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg = if total == 0 { 0.0 } else { revenue / total as f64 };
        Ok(RegionStats {
            region: self.region.clone(),
            total_rides: total,
            active_rides: active,
            completed_rides: completed,
            cancelled_rides: cancelled,
            total_revenue: round_fare(revenue),
            avg_fare: round_fare(avg),
            replication_lag_ms: Some(0),
        })
    }

    async fn health(&self) -> Result<StoreHealth, StoreError> {
        self.check_available()?;
        Ok(StoreHealth {
            primary: self.primary.clone(),
            replication_lag_ms: 0,
            last_write_at: *self.last_write_at.read(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::ride::{Location, RideStatus};

    fn ride(id: &str, region: &str) -> Ride {
        Ride {
            ride_id: id.to_string(),
            vehicle_id: "AV-1".to_string(),
            customer_id: "C-1".to_string(),
            status: RideStatus::InProgress,
            region: region.to_string(),
            fare: 20.0,
            start_location: Location { lat: 0.0, lon: 0.0 },
            current_location: Location { lat: 0.0, lon: 0.0 },
            end_location: Location { lat: 0.0, lon: 0.0 },
            timestamp: Utc::now(),
            handoff_status: None,
            locked: false,
            transaction_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_unique() {
        let store = MemoryRegionStore::new("Phoenix");
        store.insert_ride(ride("R-1", "Phoenix")).await.unwrap();
        assert_eq!(
            store.insert_ride(ride("R-1", "Phoenix")).await,
            Err(StoreError::AlreadyExists)
        );
    }

    #[tokio::test]
    async fn test_lock_cas_serializes() {
        let store = MemoryRegionStore::new("Phoenix");
        store.insert_ride(ride("R-1", "Phoenix")).await.unwrap();

        let snapshot = store.lock("R-1", "tx-a").await.unwrap();
        assert!(snapshot.locked);
        assert_eq!(snapshot.handoff_status, Some(HandoffStage::Preparing));

        // A second transaction loses the CAS.
        assert_eq!(store.lock("R-1", "tx-b").await, Err(StoreError::AlreadyLocked));
        // So does a replay by the winner; the participant resolves it.
        assert_eq!(store.lock("R-1", "tx-a").await, Err(StoreError::AlreadyLocked));
    }

    #[tokio::test]
    async fn test_unlock_requires_owner() {
        let store = MemoryRegionStore::new("Phoenix");
        store.insert_ride(ride("R-1", "Phoenix")).await.unwrap();
        store.lock("R-1", "tx-a").await.unwrap();

        assert_eq!(
            store.unlock("R-1", "tx-b").await,
            Err(StoreError::WrongTransaction)
        );
        store.unlock("R-1", "tx-a").await.unwrap();

        let doc = store.get_ride("R-1").await.unwrap();
        assert!(!doc.locked);
        assert!(doc.transaction_id.is_none());
        assert!(doc.handoff_status.is_none());
    }

    #[tokio::test]
    async fn test_guarded_delete() {
        let store = MemoryRegionStore::new("Phoenix");
        store.insert_ride(ride("R-1", "Phoenix")).await.unwrap();

        assert_eq!(
            store.delete_ride("R-1", "tx-a").await,
            Err(StoreError::WrongTransaction)
        );
        store.lock("R-1", "tx-a").await.unwrap();
        store.delete_ride("R-1", "tx-a").await.unwrap();
        assert_eq!(
            store.delete_ride("R-1", "tx-a").await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_delete_tentative_spares_locked_docs() {
        let store = MemoryRegionStore::new("Los Angeles");
        let mut tagged = ride("R-1", "Los Angeles");
        tagged.transaction_id = Some("tx-a".to_string());
        store.insert_ride(tagged).await.unwrap();

        let mut locked = ride("R-2", "Los Angeles");
        locked.locked = true;
        locked.transaction_id = Some("tx-b".to_string());
        store.insert_ride(locked).await.unwrap();

        assert!(store.delete_tentative("tx-a").await.unwrap());
        assert!(!store.delete_tentative("tx-b").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_refuses_locked() {
        let store = MemoryRegionStore::new("Phoenix");
        store.insert_ride(ride("R-1", "Phoenix")).await.unwrap();
        store.lock("R-1", "tx-a").await.unwrap();
        assert_eq!(store.remove_ride("R-1").await, Err(StoreError::AlreadyLocked));
    }

    #[tokio::test]
    async fn test_unavailable_toggle() {
        let store = MemoryRegionStore::new("Phoenix");
        store.set_available(false);
        assert!(matches!(
            store.get_ride("R-1").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert_eq!(store.get_ride("R-1").await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_stats_rollup() {
        let store = MemoryRegionStore::new("Phoenix");
        let mut a = ride("R-1", "Phoenix");
        a.fare = 10.0;
        let mut b = ride("R-2", "Phoenix");
        b.fare = 30.0;
        b.status = RideStatus::Completed;
        store.insert_ride(a).await.unwrap();
        store.insert_ride(b).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_rides, 2);
        assert_eq!(stats.active_rides, 1);
        assert_eq!(stats.completed_rides, 1);
        assert!((stats.total_revenue - 40.0).abs() < f64::EPSILON);
        assert!((stats.avg_fare - 20.0).abs() < f64::EPSILON);
    }
}
