//! Coordinator HTTP surface.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/handoff` | Initiate a cross-region handoff |
//! | `GET` | `/transactions?limit=N` | Recent transaction records |
//! | `GET` | `/health/regions` | Health monitor snapshot |
//! | `POST` | `/rides/search` | Scoped ride search |
//! | `GET` | `/stats/all` | Scatter-gather of regional statistics |
//! | `GET` | `/` | Service index and counters |
//! | `GET` | `/health` | Liveness |

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use waypoint_core::api::{HandoffRequest, SearchRequest};
use waypoint_core::error::Fault;

use crate::coordinator::Coordinator;
use crate::router::RouterError;

/// Application state shared across all handlers.
pub type AppState = Arc<Coordinator>;

/// Creates the coordinator router.
pub fn router(coordinator: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(liveness))
        .route("/handoff", post(handoff))
        .route("/transactions", get(transactions))
        .route("/health/regions", get(health_regions))
        .route("/rides/search", post(search))
        .route("/stats/all", get(stats_all))
        .with_state(coordinator)
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

/// `GET /` — service index and counters.
async fn index(State(coordinator): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": "waypoint-coordinator",
        "regions": coordinator.regions(),
        "buffered_entries": coordinator.buffered_entries(),
        "counters": coordinator.counters(),
        "endpoints": {
            "handoff": "POST /handoff",
            "search": "POST /rides/search",
            "transactions": "GET /transactions?limit=N",
            "region_health": "GET /health/regions",
            "stats": "GET /stats/all",
        },
    }))
}

/// `GET /health` — liveness.
async fn liveness() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

/// `POST /handoff` — initiate a handoff.
async fn handoff(
    State(coordinator): State<AppState>,
    Json(req): Json<HandoffRequest>,
) -> impl IntoResponse {
    let response = coordinator.handoff(&req).await;
    let invalid = response.reason.as_deref() == Some(Fault::InvalidArgument.as_str());
    let status = if invalid {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(response))
}

/// Query parameters for `GET /transactions`.
#[derive(Debug, Deserialize)]
struct TransactionsParams {
    limit: Option<usize>,
}

/// `GET /transactions` — recent transaction records.
async fn transactions(
    State(coordinator): State<AppState>,
    Query(params): Query<TransactionsParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).min(1000);
    match coordinator.transactions(limit).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /health/regions` — monitor snapshot.
async fn health_regions(State(coordinator): State<AppState>) -> impl IntoResponse {
    Json(coordinator.health_snapshot())
}

/// `POST /rides/search` — scoped search.
async fn search(
    State(coordinator): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    match coordinator.search(&req).await {
        Ok(response) => Json(response).into_response(),
        Err(e @ RouterError::Invalid(_)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e @ RouterError::Unavailable(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e @ RouterError::AllFailed(_)) => {
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// `GET /stats/all` — scatter-gather of regional statistics.
async fn stats_all(State(coordinator): State<AppState>) -> impl IntoResponse {
    Json(coordinator.stats_all().await)
}
