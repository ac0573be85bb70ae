//! Participant HTTP surface.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/rides` | Create a ride (201; 409 on duplicate) |
//! | `GET` | `/rides` | List rides with optional filters |
//! | `GET` | `/rides/{id}` | Get a ride |
//! | `PUT` | `/rides/{id}` | Partially update a ride |
//! | `DELETE` | `/rides/{id}` | Delete a ride |
//! | `GET` | `/stats` | Regional statistics |
//! | `GET` | `/health` | Store health probe |
//! | `POST` | `/2pc/prepare` | 2PC phase 1 |
//! | `POST` | `/2pc/commit` | 2PC phase 2 |
//! | `POST` | `/2pc/abort` | 2PC rollback |
//! | `GET` | `/2pc/status/{tx_id}` | 2PC recovery probe |

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use waypoint_core::api::{AbortRequest, CommitRequest, PrepareRequest, RideUpdate};
use waypoint_core::query::RideFilter;
use waypoint_core::ride::{Ride, RideStatus};
use waypoint_storage::StoreError;

use crate::participant::{Participant, ParticipantError};

/// Application state shared across all handlers.
pub type AppState = Arc<Participant>;

/// Creates the participant router.
pub fn router(participant: AppState) -> Router {
    Router::new()
        .route("/rides", post(create_ride).get(list_rides))
        .route(
            "/rides/{id}",
            get(get_ride).put(update_ride).delete(delete_ride),
        )
        .route("/stats", get(stats))
        .route("/health", get(health))
        .route("/2pc/prepare", post(prepare))
        .route("/2pc/commit", post(commit))
        .route("/2pc/abort", post(abort))
        .route("/2pc/status/{tx_id}", get(tx_status))
        .with_state(participant)
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

fn map_error(err: &ParticipantError) -> axum::response::Response {
    match err {
        ParticipantError::Invalid(msg) => error_response(StatusCode::BAD_REQUEST, msg.clone()),
        ParticipantError::Store(StoreError::NotFound) => {
            error_response(StatusCode::NOT_FOUND, "ride not found")
        }
        ParticipantError::Store(
            e @ (StoreError::AlreadyExists
            | StoreError::AlreadyLocked
            | StoreError::WrongTransaction),
        ) => error_response(StatusCode::CONFLICT, e.to_string()),
        ParticipantError::Store(StoreError::Unavailable(msg)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, msg.clone())
        }
    }
}

/// Filter query parameters for `GET /rides`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListParams {
    status: Option<RideStatus>,
    min_fare: Option<f64>,
    max_fare: Option<f64>,
    limit: Option<usize>,
}

impl ListParams {
    fn into_filter(self) -> RideFilter {
        RideFilter {
            region: None,
            status: self.status.map(|s| vec![s]),
            min_fare: self.min_fare,
            max_fare: self.max_fare,
            since: None,
            until: None,
            limit: self.limit.unwrap_or(100),
        }
    }
}

/// `POST /rides` — create a ride.
async fn create_ride(
    State(participant): State<AppState>,
    Json(ride): Json<Ride>,
) -> impl IntoResponse {
    match participant.create_ride(ride).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `GET /rides` — list rides with optional filters.
async fn list_rides(
    State(participant): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match participant.list_rides(&params.into_filter()).await {
        Ok(rides) => Json(rides).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `GET /rides/{id}` — get a ride.
async fn get_ride(
    State(participant): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match participant.get_ride(&id).await {
        Ok(ride) => Json(ride).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `PUT /rides/{id}` — partial update.
async fn update_ride(
    State(participant): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<RideUpdate>,
) -> impl IntoResponse {
    match participant.update_ride(&id, &update).await {
        Ok(ride) => Json(ride).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `DELETE /rides/{id}` — delete a ride.
async fn delete_ride(
    State(participant): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match participant.delete_ride(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => map_error(&e),
    }
}

/// `GET /stats` — regional statistics.
async fn stats(State(participant): State<AppState>) -> impl IntoResponse {
    match participant.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `GET /health` — store health probe.
async fn health(State(participant): State<AppState>) -> impl IntoResponse {
    match participant.health().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `POST /2pc/prepare` — phase 1 vote.
async fn prepare(
    State(participant): State<AppState>,
    Json(req): Json<PrepareRequest>,
) -> impl IntoResponse {
    match participant.prepare(&req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `POST /2pc/commit` — phase 2 apply.
async fn commit(
    State(participant): State<AppState>,
    Json(req): Json<CommitRequest>,
) -> impl IntoResponse {
    match participant.commit(&req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `POST /2pc/abort` — rollback.
async fn abort(
    State(participant): State<AppState>,
    Json(req): Json<AbortRequest>,
) -> impl IntoResponse {
    match participant.abort(&req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => map_error(&e),
    }
}

/// `GET /2pc/status/{tx_id}` — recovery probe.
async fn tx_status(
    State(participant): State<AppState>,
    Path(tx_id): Path<String>,
) -> impl IntoResponse {
    match participant.tx_status(&tx_id).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => map_error(&e),
    }
}
