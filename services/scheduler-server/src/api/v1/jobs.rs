//! Job endpoints: submission, control and job-side reconnection.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use sched_id::EntityId;
use sched_repository::{Row, Transaction};
use serde::{Deserialize, Serialize};

use super::{read_tx, run_blocking, write_tx};
use crate::access;
use crate::api::error::ApiError;
use crate::control;
use crate::error::ServerResult;
use crate::lifecycle;
use crate::model::{JobState, SubmittedEntity};
use crate::repository::Repository;
use crate::session::Session;
use crate::state::AppState;

/// Create job routes: /v1/jobs
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/{job_id}", get(get_job))
        .route("/{job_id}/access", post(validate_access))
        .route("/{job_id}/kill", post(kill_job))
        .route("/{job_id}/suspend", post(suspend_job))
        .route("/{job_id}/resume", post(resume_job))
        .route("/{job_id}/started", post(report_started))
        .route("/{job_id}/finished", post(report_finished))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_name: String,
    #[serde(default)]
    pub scope_id: Option<EntityId>,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
}

/// A job as seen by users. The access key is only handed to the job server.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobResponse {
    pub id: EntityId,
    pub job_name: String,
    pub state: JobState,
    pub scope_id: Option<EntityId>,
    pub parent_id: Option<EntityId>,
    pub is_suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<Row<SubmittedEntity>> for JobResponse {
    fn from(row: Row<SubmittedEntity>) -> Self {
        Self {
            id: row.id,
            job_name: row.data.job_name,
            state: row.data.state,
            scope_id: row.data.scope_id,
            parent_id: row.data.parent_id,
            is_suspended: row.data.is_suspended,
            runnable_ts: row.data.runnable_ts,
            error_msg: row.data.error_msg,
            exit_code: row.data.exit_code,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    pub token: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct AccessResponse {
    /// Entity the caller may act for.
    pub job_id: EntityId,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct KillResponse {
    pub kill_id: EntityId,
    pub job_id: EntityId,
}

/// A job process reporting progress, proving itself with its access key.
#[derive(Debug, Deserialize)]
pub struct StartedRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct FinishedRequest {
    pub token: String,
    pub exit_code: i32,
}

// =============================================================================
// Handlers
// =============================================================================

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.job_name.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_name", "job name must not be empty"));
    }
    let repo = state.repo().clone();
    let row = run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            control::submit_entity(&repo, tx, &req.job_name, req.scope_id, req.parent_id)
        })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(row))))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
) -> Result<Json<JobResponse>, ApiError> {
    let repo = state.repo().clone();
    let row = run_blocking(move || {
        read_tx(&repo, &Session::system(), |tx| Ok(repo.entities.get(tx, job_id)?))
    })
    .await?;
    Ok(Json(row.into()))
}

/// A job process proving it may act for `job_id`.
async fn validate_access(
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
    Json(req): Json<AccessRequest>,
) -> Result<Json<AccessResponse>, ApiError> {
    let repo = state.repo().clone();
    let entity_id = run_blocking(move || {
        read_tx(&repo, &Session::job(job_id), |tx| {
            access::validate_job_access(&repo, tx, job_id, &req.token, req.admin)
        })
    })
    .await?;
    Ok(Json(AccessResponse { job_id: entity_id }))
}

async fn kill_job(
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo().clone();
    let kill = run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            control::request_kill(&repo, tx, job_id)
        })
    })
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(KillResponse {
            kill_id: kill.id,
            job_id: kill.sme_id,
        }),
    ))
}

async fn suspend_job(
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| control::suspend(&repo, tx, job_id))
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| control::resume(&repo, tx, job_id))
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn report_started(
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
    Json(req): Json<StartedRequest>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::job(job_id), |tx| {
            let session = job_session(&repo, tx, job_id, &req.token)?;
            lifecycle::report_started(&repo, tx, &session, job_id)
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn report_finished(
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
    Json(req): Json<FinishedRequest>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::job(job_id), |tx| {
            let session = job_session(&repo, tx, job_id, &req.token)?;
            lifecycle::report_finished(&repo, tx, &session, job_id, req.exit_code)
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The job role for `job_id`, granted only to a caller holding its access
/// key. Terminated jobs are refused.
fn job_session(
    repo: &Repository,
    tx: &Transaction,
    job_id: EntityId,
    token: &str,
) -> ServerResult<Session> {
    access::validate_job_access(repo, tx, job_id, token, false)?;
    Ok(Session::job(job_id))
}
