//! Group membership endpoints: /v1/groups/{group_id}/members

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use sched_id::EntityId;
use sched_repository::key;
use serde::Serialize;

use super::{read_tx, run_blocking, write_tx};
use crate::api::error::ApiError;
use crate::control;
use crate::model::MEMBER_BY_GROUP;
use crate::session::Session;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_members))
        .route("/{user_id}", put(add_member).delete(remove_member))
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct MembersResponse {
    pub group_id: EntityId,
    pub members: Vec<EntityId>,
}

async fn list_members(
    State(state): State<AppState>,
    Path(group_id): Path<EntityId>,
) -> Result<Json<MembersResponse>, ApiError> {
    let repo = state.repo().clone();
    let members = run_blocking(move || {
        read_tx(&repo, &Session::system(), |tx| {
            Ok(repo.members.get_vector(tx, &MEMBER_BY_GROUP, &key![group_id])?)
        })
    })
    .await?;
    Ok(Json(MembersResponse {
        group_id,
        members: members.into_iter().map(|m| m.u_id).collect(),
    }))
}

/// Idempotent: adding an existing member succeeds.
async fn add_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(EntityId, EntityId)>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            control::add_member(&repo, tx, group_id, user_id)
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(EntityId, EntityId)>,
) -> Result<StatusCode, ApiError> {
    let repo = state.repo().clone();
    let removed = run_blocking(move || {
        write_tx(&repo, &Session::system(), |tx| {
            control::remove_member(&repo, tx, group_id, user_id)
        })
    })
    .await?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("not_a_member", format!("{user_id} is not a member of {group_id}")))
    }
}
