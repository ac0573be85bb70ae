//! Error taxonomy shared across the workspace.

use serde::{Deserialize, Serialize};

/// Machine-readable failure classification carried on votes, handoff
/// responses, and HTTP error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// Client-caused; surfaced as HTTP 400.
    InvalidArgument,
    /// Ride missing at the required site.
    NotFound,
    /// Ride already locked by another transaction.
    Contested,
    /// Target already has the ride under a different transaction.
    Duplicate,
    /// Participant or replica unreachable after retries.
    Unavailable,
    /// Handoff rejected because the source region is down; buffering
    /// would maroon the ride.
    SourceUnavailable,
    /// Deferred-handoff buffer is saturated for the target region.
    BufferFull,
    /// Transaction progressed past `PREPARED` but did not reach a
    /// terminal state before the coordinator gave up waiting.
    Partial,
    /// Unexpected failure; logged with the transaction id.
    Internal,
}

impl Fault {
    /// The wire string for this fault.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Contested => "contested",
            Self::Duplicate => "duplicate",
            Self::Unavailable => "unavailable",
            Self::SourceUnavailable => "source_unavailable",
            Self::BufferFull => "buffer_full",
            Self::Partial => "partial",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from pure domain operations (validation, state machine).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A field failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An illegal transaction state transition was requested.
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition {
        /// State on record.
        from: crate::transaction::TxState,
        /// Requested next state.
        to: crate::transaction::TxState,
    },
}

/// Errors from a [`ParticipantApi`](crate::api::ParticipantApi) call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The participant could not be reached (connect failure, timeout,
    /// 5xx after retries).
    #[error("participant unavailable: {0}")]
    Unavailable(String),

    /// The participant answered with a client-error status.
    #[error("participant rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Response could not be decoded.
    #[error("malformed participant response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// True when retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
