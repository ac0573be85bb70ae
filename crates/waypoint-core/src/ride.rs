//! Ride document model.
//!
//! A ride is the unit of data being managed: it lives in exactly one
//! regional store at a time and carries the handoff metadata
//! (`locked` / `transaction_id` / `handoff_status`) the two-phase commit
//! protocol operates on.
//!
//! Wire format note: ride business fields are camelCase (`rideId`,
//! `startLocation`, …) while handoff metadata is snake_case
//! (`handoff_status`, `locked`, `transaction_id`). The mixed casing is
//! the established document schema and is preserved verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum accepted fare in USD.
pub const MAX_FARE: f64 = 1000.0;

/// Minimum accepted positive fare in USD.
pub const MIN_FARE: f64 = 5.0;

/// GPS coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude, -90 to 90.
    pub lat: f64,
    /// Longitude, -180 to 180.
    pub lon: f64,
}

impl Location {
    /// Validates coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when either coordinate is out of
    /// range.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::Validation(format!(
                "latitude {} out of range [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(CoreError::Validation(format!(
                "longitude {} out of range [-180, 180]",
                self.lon
            )));
        }
        Ok(())
    }
}

/// Lifecycle status of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    /// Vehicle is en route with the customer.
    InProgress,
    /// Ride finished normally.
    Completed,
    /// Ride was cancelled before completion.
    Cancelled,
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Handoff progress marker stored on the ride document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffStage {
    /// The document is locked by an in-flight transaction.
    Preparing,
    /// The document was installed at its new region.
    Completed,
}

/// A ride document.
///
/// The handoff metadata fields are owned exclusively by the region
/// participant holding the document; everything else is owned by the
/// ride's producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    /// Globally unique ride id (`R-` followed by digits).
    pub ride_id: String,
    /// Vehicle id (`AV-` followed by digits).
    pub vehicle_id: String,
    /// Customer id (`C-` followed by digits).
    pub customer_id: String,
    /// Lifecycle status.
    pub status: RideStatus,
    /// Region that currently stores the ride. Always equals the owning
    /// store's region outside an in-flight handoff.
    pub region: String,
    /// Fare in USD, `0.0` or within `[MIN_FARE, MAX_FARE]`.
    pub fare: f64,
    /// Where the ride started.
    pub start_location: Location,
    /// Latest reported vehicle position.
    pub current_location: Location,
    /// Destination.
    pub end_location: Location,
    /// Last-update instant (UTC). Defaults to now on creation requests
    /// that omit it.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Handoff progress marker, empty outside a handoff.
    #[serde(rename = "handoff_status", default)]
    pub handoff_status: Option<HandoffStage>,
    /// True only while a transaction referenced by `transaction_id`
    /// holds the document.
    #[serde(rename = "locked", default)]
    pub locked: bool,
    /// Owning transaction id while locked or tentatively inserted.
    #[serde(rename = "transaction_id", default)]
    pub transaction_id: Option<String>,
}

impl Ride {
    /// Validates id formats, fare bounds, and coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_id(&self.ride_id, "R-", "rideId")?;
        validate_id(&self.vehicle_id, "AV-", "vehicleId")?;
        validate_id(&self.customer_id, "C-", "customerId")?;
        validate_fare(self.fare)?;
        self.start_location.validate()?;
        self.current_location.validate()?;
        self.end_location.validate()?;
        if self.locked && self.transaction_id.is_none() {
            return Err(CoreError::Validation(
                "locked ride must carry a transaction_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true when the document is locked by the given transaction.
    #[must_use]
    pub fn locked_by(&self, tx_id: &str) -> bool {
        self.locked && self.transaction_id.as_deref() == Some(tx_id)
    }

    /// Returns true when the document references the given transaction,
    /// locked or not (a tentative target insert is unlocked but tagged).
    #[must_use]
    pub fn references_tx(&self, tx_id: &str) -> bool {
        self.transaction_id.as_deref() == Some(tx_id)
    }
}

/// Checks `prefix` followed by at least one digit.
fn validate_id(value: &str, prefix: &str, field: &str) -> Result<(), CoreError> {
    let digits = value.strip_prefix(prefix).unwrap_or("");
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::Validation(format!(
            "{field} '{value}' does not match {prefix}<digits>"
        )));
    }
    Ok(())
}

/// Fare must be zero or within `[MIN_FARE, MAX_FARE]`.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] on out-of-range fares.
pub fn validate_fare(fare: f64) -> Result<(), CoreError> {
    if !fare.is_finite() || fare < 0.0 {
        return Err(CoreError::Validation(format!(
            "fare {fare} must be non-negative"
        )));
    }
    if fare > MAX_FARE {
        return Err(CoreError::Validation(format!(
            "fare {fare} exceeds maximum {MAX_FARE}"
        )));
    }
    if fare > 0.0 && fare < MIN_FARE {
        return Err(CoreError::Validation(format!(
            "fare {fare} below minimum {MIN_FARE}"
        )));
    }
    Ok(())
}

/// Rounds a fare to cents.
#[must_use]
pub fn round_fare(fare: f64) -> f64 {
    (fare * 100.0).round() / 100.0
}
