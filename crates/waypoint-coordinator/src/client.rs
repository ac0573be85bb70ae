//! HTTP participant client and the region registry.
//!
//! [`HttpParticipantClient`] maps the [`ParticipantApi`] seam onto a
//! region's HTTP surface. Connect failures, timeouts, and 5xx answers
//! become [`ApiError::Unavailable`] (retryable); 4xx answers become
//! [`ApiError::Rejected`] (permanent).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use waypoint_core::api::{
    AbortRequest, AbortResponse, CommitRequest, CommitResponse, HealthReport, ParticipantApi,
    PrepareRequest, PrepareResponse, RegionStats, TxStatusResponse,
};
use waypoint_core::error::ApiError;
use waypoint_core::query::RideFilter;
use waypoint_core::ride::Ride;

/// HTTP implementation of [`ParticipantApi`] for one region.
pub struct HttpParticipantClient {
    region: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpParticipantClient {
    /// Creates a client for one region's base URL.
    ///
    /// `call_timeout` bounds every request issued through this client;
    /// protocol steps that need a tighter deadline wrap calls in their
    /// own timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unavailable`] when the underlying HTTP client
    /// cannot be constructed.
    pub fn new(
        region: impl Into<String>,
        base_url: impl Into<String>,
        call_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| ApiError::Unavailable(format!("http client: {e}")))?;
        let base_url = base_url.into();
        Ok(Self {
            region: region.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Region this client talks to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Malformed(e.to_string()))
        } else {
            let message = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                Err(ApiError::Unavailable(format!("{status}: {message}")))
            } else {
                Err(ApiError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    fn transport_error(e: &reqwest::Error) -> ApiError {
        ApiError::Unavailable(e.to_string())
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        Self::decode(response).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ParticipantApi for HttpParticipantClient {
    async fn prepare(&self, req: &PrepareRequest) -> Result<PrepareResponse, ApiError> {
        self.post_json("/2pc/prepare", req).await
    }

    async fn commit(&self, req: &CommitRequest) -> Result<CommitResponse, ApiError> {
        self.post_json("/2pc/commit", req).await
    }

    async fn abort(&self, req: &AbortRequest) -> Result<AbortResponse, ApiError> {
        self.post_json("/2pc/abort", req).await
    }

    async fn tx_status(&self, tx_id: &str) -> Result<TxStatusResponse, ApiError> {
        self.get_json(&format!("/2pc/status/{tx_id}"), &[]).await
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        self.get_json("/health", &[]).await
    }

    async fn stats(&self) -> Result<RegionStats, ApiError> {
        self.get_json("/stats", &[]).await
    }

    async fn list_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, ApiError> {
        let mut query: Vec<(&str, String)> = vec![("limit", filter.limit.to_string())];
        if let Some(statuses) = &filter.status {
            // The listing endpoint takes a single status; wider sets are
            // filtered by the router after the merge.
            if let [only] = statuses.as_slice() {
                query.push(("status", only.to_string()));
            }
        }
        if let Some(min) = filter.min_fare {
            query.push(("min_fare", min.to_string()));
        }
        if let Some(max) = filter.max_fare {
            query.push(("max_fare", max.to_string()));
        }
        self.get_json("/rides", &query).await
    }
}

/// Registry of participants keyed by region name.
pub struct ParticipantSet {
    participants: BTreeMap<String, Arc<dyn ParticipantApi>>,
}

impl ParticipantSet {
    /// Builds a registry from explicit participants (used by tests and
    /// single-process deployments).
    #[must_use]
    pub fn new(participants: BTreeMap<String, Arc<dyn ParticipantApi>>) -> Self {
        Self { participants }
    }

    /// Builds HTTP clients for every configured region.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unavailable`] when a client cannot be built.
    pub fn from_urls(
        regions: &BTreeMap<String, String>,
        call_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let mut participants: BTreeMap<String, Arc<dyn ParticipantApi>> = BTreeMap::new();
        for (region, url) in regions {
            let client = HttpParticipantClient::new(region.clone(), url.clone(), call_timeout)?;
            participants.insert(region.clone(), Arc::new(client));
        }
        Ok(Self { participants })
    }

    /// Looks up one region.
    #[must_use]
    pub fn get(&self, region: &str) -> Option<Arc<dyn ParticipantApi>> {
        self.participants.get(region).cloned()
    }

    /// Region names in deterministic order.
    #[must_use]
    pub fn regions(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Iterates `(region, participant)` pairs in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn ParticipantApi>)> {
        self.participants.iter()
    }

    /// Number of regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// True when no regions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
