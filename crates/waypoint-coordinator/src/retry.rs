//! Retry schedule for transient participant failures.
//!
//! Exponential backoff with a deterministic jitter derived from the
//! attempt number, so retry storms from concurrent transactions spread
//! out without pulling in a randomness dependency. Retries always carry
//! the same transaction id, so participant idempotence absorbs
//! duplicate deliveries.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use waypoint_core::config::RetryConfig;
use waypoint_core::error::ApiError;

/// Growth factor between consecutive delays.
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Jitter amplitude as a fraction of the delay.
const JITTER_FRACTION: f64 = 0.25;

/// Bounded exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Builds a policy from configuration.
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            cap: Duration::from_millis(config.cap_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Attempts allowed per logical call.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry following `attempt` (1-based), or `None`
    /// when the attempt budget is spent.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exp = BACKOFF_MULTIPLIER.powi(attempt.saturating_sub(1) as i32);
        let raw_ms = (self.base.as_millis() as f64 * exp).min(self.cap.as_millis() as f64);

        // Deterministic jitter: ±25% keyed off the attempt number.
        let jitter_range = raw_ms * JITTER_FRACTION;
        let jitter_offset = if jitter_range > 0.0 {
            (f64::from(attempt) * 7.0) % jitter_range - jitter_range / 2.0
        } else {
            0.0
        };
        let jittered_ms = (raw_ms + jitter_offset).max(1.0);
        Some(Duration::from_millis(jittered_ms as u64))
    }
}

/// Runs a participant call under a deadline; expiry maps to a
/// retryable unavailability.
///
/// # Errors
///
/// [`ApiError::Unavailable`] when `limit` is already spent or elapses
/// before the call returns; otherwise the call's own result.
pub async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    if limit.is_zero() {
        return Err(ApiError::Unavailable("call deadline exceeded".to_string()));
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Unavailable("call deadline exceeded".to_string())),
    }
}

/// Runs `op` up to the policy's attempt budget, sleeping between
/// transient failures. Non-transient errors return immediately.
///
/// # Errors
///
/// The last [`ApiError`] once the budget is spent, or the first
/// non-transient error.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => match policy.delay_after(attempt) {
                Some(delay) => {
                    warn!(
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(call = label, attempt, error = %e, "retry budget exhausted");
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}
