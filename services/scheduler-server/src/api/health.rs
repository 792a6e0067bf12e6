//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// Repository figures, present on `/readyz`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryStatus>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RepositoryStatus {
    pub last_committed: u64,
    pub lowest_active: u64,
    pub open_transactions: usize,
    pub pending_pings: usize,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

fn response(repository: Option<RepositoryStatus>) -> HealthResponse {
    HealthResponse {
        status: "ok".to_string(),
        service: "scheduler-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        repository,
    }
}

/// Basic health check - is the service running?
async fn healthz() -> impl IntoResponse {
    Json(response(None))
}

/// Readiness check with repository version figures.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let db = state.repo().db();
    Json(response(Some(RepositoryStatus {
        last_committed: db.last_committed().value(),
        lowest_active: db.lowest_active_version().value(),
        open_transactions: db.open_transactions(),
        pending_pings: state.ping_list().len(),
    })))
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}
