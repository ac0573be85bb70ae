//! Handoff transaction record and state machine.
//!
//! A transaction record is the durable trace of one ride handoff. State
//! transitions are monotone:
//!
//! ```text
//! STARTED ──▶ PREPARED ──▶ COMMITTED
//!    │            │
//!    └────────────┴──────▶ ABORTED
//! ```
//!
//! `COMMITTED` and `ABORTED` are terminal and immutable. The transaction
//! log enforces this machine on every append; violating writes are
//! rejected rather than silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ride::Ride;

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    /// Allocated and logged; PREPARE may have partially run.
    Started,
    /// Both participants voted COMMIT; a ride snapshot is on record.
    Prepared,
    /// The ride was installed at the target and removed from the source.
    Committed,
    /// The handoff was rolled back; the source ride is unlocked.
    Aborted,
}

impl TxState {
    /// Returns true for `COMMITTED` and `ABORTED`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    /// Whether a record in `self` may be rewritten in state `next`.
    ///
    /// Same-state rewrites are allowed (idempotent appends update
    /// non-key fields); otherwise only the forward edges of the state
    /// machine are legal.
    #[must_use]
    pub fn can_transition_to(self, next: TxState) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Started, Self::Prepared | Self::Aborted)
                | (Self::Prepared, Self::Committed | Self::Aborted)
        )
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "STARTED"),
            Self::Prepared => write!(f, "PREPARED"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A participant's answer to PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    /// Participant is ready to commit.
    Commit,
    /// Participant refuses; the transaction must abort.
    Abort,
}

/// Which side of the handoff a participant plays for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// The region giving up the ride.
    Source,
    /// The region receiving the ride.
    Target,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "SOURCE"),
            Self::Target => write!(f, "TARGET"),
        }
    }
}

/// Durable record of one handoff transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction id (UUID v4, allocated by the coordinator).
    pub tx_id: String,
    /// Ride being moved.
    pub ride_id: String,
    /// Region giving up the ride.
    pub source: String,
    /// Region receiving the ride.
    pub target: String,
    /// Current state.
    pub state: TxState,
    /// Source participant's vote, once collected.
    #[serde(default)]
    pub source_vote: Option<Vote>,
    /// Target participant's vote, once collected.
    #[serde(default)]
    pub target_vote: Option<Vote>,
    /// When the record was created. Immutable after the first append.
    pub started_at: DateTime<Utc>,
    /// When both votes were collected.
    #[serde(default)]
    pub prepared_at: Option<DateTime<Utc>>,
    /// When the commit phase finished.
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,
    /// When the abort path finished.
    #[serde(default)]
    pub aborted_at: Option<DateTime<Utc>>,
    /// Failure reason for aborted or partial transactions.
    #[serde(default)]
    pub error: Option<String>,
    /// Full ride document captured during source PREPARE. Present from
    /// `PREPARED` onward; recovery re-drives the commit phase from it.
    #[serde(default)]
    pub ride_snapshot: Option<Ride>,
}

impl TransactionRecord {
    /// Creates a fresh `STARTED` record.
    #[must_use]
    pub fn started(
        tx_id: impl Into<String>,
        ride_id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            tx_id: tx_id.into(),
            ride_id: ride_id.into(),
            source: source.into(),
            target: target.into(),
            state: TxState::Started,
            source_vote: None,
            target_vote: None,
            started_at: Utc::now(),
            prepared_at: None,
            committed_at: None,
            aborted_at: None,
            error: None,
            ride_snapshot: None,
        }
    }

    /// Marks the record `PREPARED` with both COMMIT votes and the source
    /// snapshot.
    pub fn mark_prepared(&mut self, snapshot: Ride) {
        self.state = TxState::Prepared;
        self.source_vote = Some(Vote::Commit);
        self.target_vote = Some(Vote::Commit);
        self.ride_snapshot = Some(snapshot);
        self.prepared_at = Some(Utc::now());
    }

    /// Marks the record terminal `COMMITTED`.
    pub fn mark_committed(&mut self) {
        self.state = TxState::Committed;
        self.committed_at = Some(Utc::now());
    }

    /// Marks the record terminal `ABORTED` with a reason.
    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.state = TxState::Aborted;
        self.error = Some(reason.into());
        self.aborted_at = Some(Utc::now());
    }

    /// True when both participants voted COMMIT.
    #[must_use]
    pub fn unanimous_commit(&self) -> bool {
        self.source_vote == Some(Vote::Commit) && self.target_vote == Some(Vote::Commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TxState::Started.is_terminal());
        assert!(!TxState::Prepared.is_terminal());
        assert!(TxState::Committed.is_terminal());
        assert!(TxState::Aborted.is_terminal());
    }

    #[test]
    fn test_forward_edges_allowed() {
        assert!(TxState::Started.can_transition_to(TxState::Prepared));
        assert!(TxState::Started.can_transition_to(TxState::Aborted));
        assert!(TxState::Prepared.can_transition_to(TxState::Committed));
        assert!(TxState::Prepared.can_transition_to(TxState::Aborted));
    }

    #[test]
    fn test_backward_and_terminal_edges_rejected() {
        assert!(!TxState::Prepared.can_transition_to(TxState::Started));
        assert!(!TxState::Committed.can_transition_to(TxState::Aborted));
        assert!(!TxState::Aborted.can_transition_to(TxState::Committed));
        assert!(!TxState::Committed.can_transition_to(TxState::Started));
        assert!(!TxState::Started.can_transition_to(TxState::Committed));
    }

    #[test]
    fn test_same_state_rewrite_allowed() {
        assert!(TxState::Started.can_transition_to(TxState::Started));
        assert!(TxState::Committed.can_transition_to(TxState::Committed));
    }

    #[test]
    fn test_record_lifecycle() {
        let mut rec = TransactionRecord::started("tx-1", "R-1", "Phoenix", "Los Angeles");
        assert_eq!(rec.state, TxState::Started);
        assert!(rec.prepared_at.is_none());
        assert!(!rec.unanimous_commit());

        let ride = crate::ride::Ride {
            ride_id: "R-1".to_string(),
            vehicle_id: "AV-1".to_string(),
            customer_id: "C-1".to_string(),
            status: crate::ride::RideStatus::InProgress,
            region: "Phoenix".to_string(),
            fare: 10.0,
            start_location: crate::ride::Location { lat: 0.0, lon: 0.0 },
            current_location: crate::ride::Location { lat: 0.0, lon: 0.0 },
            end_location: crate::ride::Location { lat: 0.0, lon: 0.0 },
            timestamp: Utc::now(),
            handoff_status: None,
            locked: false,
            transaction_id: None,
        };
        rec.mark_prepared(ride);
        assert_eq!(rec.state, TxState::Prepared);
        assert!(rec.unanimous_commit());
        assert!(rec.ride_snapshot.is_some());

        rec.mark_committed();
        assert_eq!(rec.state, TxState::Committed);
        assert!(rec.committed_at.is_some());
    }
}
