//! Scope and job server endpoints.
//!
//! Job servers connect to their scope, then poll it for directives.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use sched_id::{EntityId, SessionId};
use sched_repository::Row;
use serde::{Deserialize, Serialize};

use super::{read_tx, run_blocking, write_tx};
use crate::api::error::ApiError;
use crate::dispatch::{Directive, LivenessTracker};
use crate::model::{scope_state_key, JobState, RunnableQueueEntry, Scope, ScopeKind, QUEUE_BY_SCOPE_STATE};
use crate::scopes;
use crate::session::Session;
use crate::state::AppState;

/// Create scope routes: /v1/scopes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_scope))
        .route("/{scope_id}", get(get_scope))
        .route("/{scope_id}/config", put(alter_config))
        .route("/{scope_id}/connect", post(connect))
        .route("/{scope_id}/disconnect", post(disconnect))
        .route("/{scope_id}/poll", post(poll))
        .route("/{scope_id}/shutdown", post(shutdown))
        .route("/{scope_id}/suspend", post(suspend))
        .route("/{scope_id}/resume", post(resume))
        .route("/{scope_id}/queue", get(list_queue))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateScopeRequest {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    #[serde(default = "default_kind")]
    pub kind: ScopeKind,
}

fn default_kind() -> ScopeKind {
    ScopeKind::Scope
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ScopeResponse {
    pub id: EntityId,
    pub name: String,
    pub parent_id: Option<EntityId>,
    pub kind: ScopeKind,
    pub is_enabled: bool,
    pub is_suspended: bool,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
    pub config: BTreeMap<String, String>,
}

impl From<Row<Scope>> for ScopeResponse {
    fn from(row: Row<Scope>) -> Self {
        let is_connected = row.is_connected();
        Self {
            id: row.id,
            name: row.data.name,
            parent_id: row.data.parent_id,
            kind: row.data.kind,
            is_enabled: row.data.is_enabled,
            is_suspended: row.data.is_suspended,
            is_connected,
            last_active: row.data.last_active,
            config: row.data.config,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlterConfigRequest {
    pub items: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ConnectResponse {
    pub session_id: SessionId,
    /// Poll at least this often or the session is dropped.
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct QueueEntryResponse {
    pub id: EntityId,
    pub sme_id: EntityId,
    pub state: JobState,
}

impl From<Row<RunnableQueueEntry>> for QueueEntryResponse {
    fn from(row: Row<RunnableQueueEntry>) -> Self {
        Self {
            id: row.id,
            sme_id: row.sme_id,
            state: row.state,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_scope(
    State(state): State<AppState>,
    Json(req): Json<CreateScopeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_name", "scope name must not be empty"));
    }
    let repo = state.repo().clone();
    let row = run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            scopes::create_scope(&repo, tx, &req.name, req.parent_id, req.kind)
        })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(ScopeResponse::from(row))))
}

async fn get_scope(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<Json<ScopeResponse>, ApiError> {
    let repo = state.repo().clone();
    let row = run_blocking(move || {
        read_tx(&repo, &Session::system(), |tx| Ok(repo.scopes.get(tx, scope_id)?))
    })
    .await?;
    Ok(Json(row.into()))
}

async fn alter_config(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
    Json(req): Json<AlterConfigRequest>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            scopes::alter_config(&repo, tx, scope_id, req.items)
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn connect(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let repo = state.repo().clone();
    let session = Session::job_server(scope_id);
    let session_id = session.id();
    let timeout = run_blocking(move || {
        write_tx(&repo, &session, |tx| {
            scopes::connect_scope(&repo, tx, scope_id, session_id)
        })
    })
    .await?;
    Ok(Json(ConnectResponse {
        session_id,
        timeout_secs: timeout.as_secs(),
    }))
}

async fn disconnect(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::job_server(scope_id), |tx| {
            scopes::disconnect_scope(&repo, tx, scope_id)
        })
    })
    .await?;
    state.ping_list().deregister(scope_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Next directive for the polling job server.
async fn poll(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<Json<Directive>, ApiError> {
    let dispatcher = state.dispatcher().clone();
    let directive = run_blocking(move || {
        dispatcher.poll_directive(&Session::job_server(scope_id), scope_id)
    })
    .await?;
    Ok(Json(directive))
}

async fn shutdown(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            scopes::request_shutdown(&repo, tx, scope_id)
        })
    })
    .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn suspend(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    set_suspended(state, scope_id, true).await
}

async fn resume(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    set_suspended(state, scope_id, false).await
}

async fn set_suspended(state: AppState, scope_id: EntityId, suspended: bool) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            scopes::set_scope_suspended(&repo, tx, scope_id, suspended)
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Starting entries first, then runnable ones, each in index order.
async fn list_queue(
    State(state): State<AppState>,
    Path(scope_id): Path<EntityId>,
) -> Result<Json<Vec<QueueEntryResponse>>, ApiError> {
    let repo = state.repo().clone();
    let entries = run_blocking(move || {
        read_tx(&repo, &Session::system(), |tx| {
            repo.scopes.get(tx, scope_id)?;
            let mut entries = Vec::new();
            for slice in [JobState::Starting, JobState::Runnable] {
                entries.extend(repo.queue.get_vector(
                    tx,
                    &QUEUE_BY_SCOPE_STATE,
                    &scope_state_key(scope_id, slice),
                )?);
            }
            Ok(entries)
        })
    })
    .await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
