//! Configuration for both Waypoint services.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level configuration.
///
/// All durations are configured in milliseconds; accessors return
/// [`Duration`]. `Default` matches the documented protocol defaults, so
/// a config file only needs to override what differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    /// Region name → participant base URL.
    pub regions: BTreeMap<String, String>,
    /// Base URL or store descriptor of the read-only global replica.
    pub global_replica: Option<String>,
    /// Directory holding the durable transaction log.
    pub log_dir: PathBuf,
    /// Health monitor knobs.
    pub monitor: MonitorConfig,
    /// Handoff protocol knobs.
    pub handoff: HandoffConfig,
    /// Deferred-handoff buffer knobs.
    pub buffer: BufferConfig,
    /// Query router knobs.
    pub query: QueryConfig,
}

impl Default for WaypointConfig {
    fn default() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(
            "Phoenix".to_string(),
            "http://localhost:8001".to_string(),
        );
        regions.insert(
            "Los Angeles".to_string(),
            "http://localhost:8002".to_string(),
        );
        Self {
            regions,
            global_replica: None,
            log_dir: PathBuf::from("./waypoint-txlog"),
            monitor: MonitorConfig::default(),
            handoff: HandoffConfig::default(),
            buffer: BufferConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

impl WaypointConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when the file cannot be read or
    /// parsed, or when the result fails [`validate`](Self::validate).
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Validation(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Validation(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty or contradictory configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] naming the offending option.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.regions.is_empty() {
            return Err(CoreError::Validation(
                "at least one region must be configured".to_string(),
            ));
        }
        if self.handoff.retry.max_attempts == 0 {
            return Err(CoreError::Validation(
                "handoff.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.buffer.max_per_region == 0 {
            return Err(CoreError::Validation(
                "buffer.max_per_region must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// True when `name` is a configured region.
    #[must_use]
    pub fn knows_region(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Probe interval. Default: 5000.
    pub interval_ms: u64,
    /// Per-probe timeout. Default: 3000.
    pub timeout_ms: u64,
    /// Consecutive failures before `UNAVAILABLE`. Default: 3.
    pub failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            timeout_ms: 3000,
            failure_threshold: 3,
        }
    }
}

impl MonitorConfig {
    /// Probe interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Probe timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Handoff protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Per-call PREPARE deadline. Default: 5000.
    pub prepare_timeout_ms: u64,
    /// Per-call COMMIT deadline. Default: 5000.
    pub commit_timeout_ms: u64,
    /// Whole-transaction deadline. Default: 30000.
    pub overall_timeout_ms: u64,
    /// Per-logical-call retry schedule.
    pub retry: RetryConfig,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 5000,
            commit_timeout_ms: 5000,
            overall_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

impl HandoffConfig {
    /// PREPARE deadline as a [`Duration`].
    #[must_use]
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    /// COMMIT deadline as a [`Duration`].
    #[must_use]
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// Whole-transaction deadline as a [`Duration`].
    #[must_use]
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }
}

/// Exponential backoff schedule for transient participant failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First delay. Default: 100.
    pub base_ms: u64,
    /// Delay ceiling. Default: 2000.
    pub cap_ms: u64,
    /// Attempts per logical call. Default: 3.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            cap_ms: 2000,
            max_attempts: 3,
        }
    }
}

/// Deferred-handoff buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Cap on buffered entries per target region; overflow rejects the
    /// handoff with `buffer_full`. Default: 1000.
    pub max_per_region: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_per_region: 1000,
        }
    }
}

/// Query router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Per-participant call deadline. Default: 5000.
    pub per_call_timeout_ms: u64,
    /// Cap on total scatter-gather latency. Default: 10000.
    pub global_timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            per_call_timeout_ms: 5000,
            global_timeout_ms: 10_000,
        }
    }
}

impl QueryConfig {
    /// Per-call deadline as a [`Duration`].
    #[must_use]
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Global deadline as a [`Duration`].
    #[must_use]
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }
}
