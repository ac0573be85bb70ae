//! Search scopes, filters, and result ordering.
//!
//! The filter surface is fixed and minimal: region (for local scope), a
//! status set, a fare range, a time range, and a limit. Unknown fields
//! are rejected at the wire boundary (`deny_unknown_fields` on
//! [`SearchRequest`](crate::api::SearchRequest)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ride::{Ride, RideStatus};

/// Lower bound on a search limit.
pub const MIN_LIMIT: usize = 1;

/// Upper bound on a search limit.
pub const MAX_LIMIT: usize = 1000;

/// Consistency scope of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryScope {
    /// One region, strong consistency w.r.t. that region's writes.
    #[serde(rename = "local")]
    Local,
    /// Global replica, eventual consistency.
    #[serde(rename = "global-fast")]
    GlobalFast,
    /// Parallel fan-out to every region, merged live.
    #[serde(rename = "global-live")]
    GlobalLive,
}

impl std::fmt::Display for QueryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::GlobalFast => write!(f, "global-fast"),
            Self::GlobalLive => write!(f, "global-live"),
        }
    }
}

/// Ride predicate evaluated by every read path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideFilter {
    /// Restrict to one region (ignored by stores that only hold one).
    #[serde(default)]
    pub region: Option<String>,
    /// Restrict to any of these statuses; empty/none = all.
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
    /// Maximum results, `MIN_LIMIT..=MAX_LIMIT`.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl RideFilter {
    /// Validates bounds and the limit range.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] on a reversed fare range or an
    /// out-of-range limit.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&self.limit) {
            return Err(CoreError::Validation(format!(
                "limit {} out of range [{MIN_LIMIT}, {MAX_LIMIT}]",
                self.limit
            )));
        }
        if let (Some(min), Some(max)) = (self.min_fare, self.max_fare) {
            if min > max {
                return Err(CoreError::Validation(format!(
                    "min_fare {min} greater than max_fare {max}"
                )));
            }
        }
        if let Some(min) = self.min_fare {
            if min < 0.0 {
                return Err(CoreError::Validation(format!(
                    "min_fare {min} must be non-negative"
                )));
            }
        }
        Ok(())
    }

    /// Whether a ride satisfies every bound of this filter.
    #[must_use]
    pub fn matches(&self, ride: &Ride) -> bool {
        if let Some(region) = &self.region {
            if &ride.region != region {
                return false;
            }
        }
        if let Some(statuses) = &self.status {
            if !statuses.is_empty() && !statuses.contains(&ride.status) {
                return false;
            }
        }
        if let Some(min) = self.min_fare {
            if ride.fare < min {
                return false;
            }
        }
        if let Some(max) = self.max_fare {
            if ride.fare > max {
                return false;
            }
        }
        if let Some(since) = self.since {
            if ride.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if ride.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Canonical result ordering: timestamp descending, then `rideId`
/// ascending so equal-timestamp results are deterministic.
pub fn sort_rides(rides: &mut [Ride]) {
    rides.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.ride_id.cmp(&b.ride_id))
    });
}

/// Deduplicates by `rideId`, preferring the copy with the higher
/// timestamp. Input order is otherwise preserved by the caller's
/// subsequent [`sort_rides`].
#[must_use]
pub fn dedup_rides(rides: Vec<Ride>) -> Vec<Ride> {
    let mut by_id: std::collections::HashMap<String, Ride> = std::collections::HashMap::new();
    for ride in rides {
        match by_id.get(&ride.ride_id) {
            Some(existing) if existing.timestamp >= ride.timestamp => {}
            _ => {
                by_id.insert(ride.ride_id.clone(), ride);
            }
        }
    }
    by_id.into_values().collect()
}
