//! Query router: local, fast-global, and live-global reads.
//!
//! - `local` forwards the filter to one participant — strong
//!   consistency with respect to that region's writes.
//! - `global-fast` reads the global replica — eventually consistent,
//!   trailing regional writes by the change-feed lag.
//! - `global-live` fans out to every participant in parallel, merges,
//!   deduplicates by ride id (preferring the higher timestamp), sorts
//!   by timestamp descending with ride id as tie-break, and truncates
//!   to the limit. Individual participant failures become warnings;
//!   the query only fails when every participant does.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, warn};

use waypoint_core::api::{ParticipantApi, SearchRequest, SearchResponse};
use waypoint_core::error::ApiError;
use waypoint_core::query::{dedup_rides, sort_rides, QueryScope, RideFilter};
use waypoint_core::ride::Ride;

use waypoint_core::config::QueryConfig;

use crate::client::ParticipantSet;
use crate::health::HealthMonitor;
use crate::retry::bounded;

/// Errors from the search surface.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The request failed validation.
    #[error("invalid search: {0}")]
    Invalid(String),

    /// The single backing read (local region or replica) is down.
    #[error("search target unavailable: {0}")]
    Unavailable(String),

    /// Every fanned-out participant failed.
    #[error("all regions failed: {0}")]
    AllFailed(String),
}

/// Routes reads to the right scope.
pub struct QueryRouter {
    participants: Arc<ParticipantSet>,
    replica: Option<Arc<dyn ParticipantApi>>,
    monitor: Arc<HealthMonitor>,
    config: QueryConfig,
}

impl QueryRouter {
    /// Wires a router over the participant registry and the optional
    /// global replica reader.
    #[must_use]
    pub fn new(
        participants: Arc<ParticipantSet>,
        replica: Option<Arc<dyn ParticipantApi>>,
        monitor: Arc<HealthMonitor>,
        config: QueryConfig,
    ) -> Self {
        Self {
            participants,
            replica,
            monitor,
            config,
        }
    }

    /// Executes one search.
    ///
    /// # Errors
    ///
    /// [`RouterError::Invalid`] for bad filters or a missing local
    /// region; [`RouterError::Unavailable`] when the single backing
    /// read fails; [`RouterError::AllFailed`] when a live fan-out gets
    /// no answers at all.
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse, RouterError> {
        let started = Instant::now();
        let filter = req.to_filter();
        filter
            .validate()
            .map_err(|e| RouterError::Invalid(e.to_string()))?;

        match req.scope {
            QueryScope::Local => self.search_local(&filter, started).await,
            QueryScope::GlobalFast => self.search_global_fast(&filter, started).await,
            QueryScope::GlobalLive => self.search_global_live(&filter, started).await,
        }
    }

    async fn search_local(
        &self,
        filter: &RideFilter,
        started: Instant,
    ) -> Result<SearchResponse, RouterError> {
        let region = filter
            .region
            .clone()
            .ok_or_else(|| RouterError::Invalid("region is required for local scope".to_string()))?;
        let participant = self
            .participants
            .get(&region)
            .ok_or_else(|| RouterError::Invalid(format!("unknown region '{region}'")))?;

        let mut results = self
            .fetch(&participant, filter)
            .await
            .map_err(|e| RouterError::Unavailable(format!("{region}: {e}")))?;
        results.retain(|ride| filter.matches(ride));
        sort_rides(&mut results);
        results.truncate(filter.limit);

        Ok(respond(results, vec![region], Vec::new(), started))
    }

    async fn search_global_fast(
        &self,
        filter: &RideFilter,
        started: Instant,
    ) -> Result<SearchResponse, RouterError> {
        let replica = self
            .replica
            .as_ref()
            .ok_or_else(|| RouterError::Unavailable("no global replica configured".to_string()))?;

        let mut results = self
            .fetch(replica, filter)
            .await
            .map_err(|e| RouterError::Unavailable(format!("global replica: {e}")))?;
        results.retain(|ride| filter.matches(ride));
        sort_rides(&mut results);
        results.truncate(filter.limit);

        Ok(respond(
            results,
            vec!["global-replica".to_string()],
            Vec::new(),
            started,
        ))
    }

    async fn search_global_live(
        &self,
        filter: &RideFilter,
        started: Instant,
    ) -> Result<SearchResponse, RouterError> {
        let mut warnings = Vec::new();
        let mut queried = Vec::new();
        let mut calls = Vec::new();

        for (region, participant) in self.participants.iter() {
            queried.push(region.clone());
            // The monitor pre-filters known-dead regions so the fan-out
            // does not wait out their timeout.
            if self.monitor.is_unavailable(region) {
                warnings.push(format!("{region}: marked unavailable by health monitor"));
                continue;
            }
            let region = region.clone();
            let participant = Arc::clone(participant);
            let filter = filter.clone();
            calls.push(async move {
                let result = self.fetch(&participant, &filter).await;
                (region, result)
            });
        }

        if calls.is_empty() {
            return Err(RouterError::AllFailed(warnings.join("; ")));
        }

        let mut merged: Vec<Ride> = Vec::new();
        let mut successes = 0usize;
        for (region, result) in join_all(calls).await {
            match result {
                Ok(rides) => {
                    successes += 1;
                    debug!(region = %region, count = rides.len(), "fan-out answer");
                    merged.extend(rides);
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "fan-out participant failed");
                    warnings.push(format!("{region}: {e}"));
                }
            }
        }

        if successes == 0 {
            return Err(RouterError::AllFailed(warnings.join("; ")));
        }

        merged.retain(|ride| filter.matches(ride));
        let mut results = dedup_rides(merged);
        sort_rides(&mut results);
        results.truncate(filter.limit);

        Ok(respond(results, queried, warnings, started))
    }

    /// One participant read under the per-call deadline (itself capped
    /// by the global deadline so the fan-out's total latency stays
    /// bounded).
    async fn fetch(
        &self,
        participant: &Arc<dyn ParticipantApi>,
        filter: &RideFilter,
    ) -> Result<Vec<Ride>, ApiError> {
        let limit = self
            .config
            .per_call_timeout()
            .min(self.config.global_timeout());
        bounded(limit, participant.list_rides(filter)).await
    }
}

#[allow(clippy::cast_precision_loss)]
fn respond(
    results: Vec<Ride>,
    regions_queried: Vec<String>,
    warnings: Vec<String>,
    started: Instant,
) -> SearchResponse {
    SearchResponse {
        results,
        latency_ms: (started.elapsed().as_micros() as f64 / 1000.0 * 100.0).round() / 100.0,
        regions_queried,
        warnings,
    }
}
