//! Submission, kill requests, suspension and group membership.

use sched_id::EntityId;
use sched_repository::{key, RepoError, Row, Transaction};
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};
use crate::model::{
    KillJob, Member, SubmittedEntity, ENTITY_BY_PARENT, MEMBER_BY_GROUP_USER,
};
use crate::repository::Repository;

/// Submits a job, optionally below a parent entity.
///
/// A child of a suspended tree starts out counting its suspended ancestors.
pub fn submit_entity(
    repo: &Repository,
    tx: &mut Transaction,
    job_name: &str,
    scope_id: Option<EntityId>,
    parent_id: Option<EntityId>,
) -> ServerResult<Row<SubmittedEntity>> {
    if let Some(scope) = scope_id {
        repo.scopes.get(tx, scope)?;
    }
    let mut entity = SubmittedEntity::submitted(job_name, scope_id, parent_id);
    if let Some(parent) = parent_id {
        let parent = repo.entities.get(tx, parent)?;
        entity.parent_suspended = parent.parent_suspended + u32::from(parent.is_suspended);
    }
    let row = repo.entities.create(tx, entity)?;
    info!(job_id = %row.id, job_name, "Job submitted");
    Ok(row)
}

/// Requests termination of a running entity.
pub fn request_kill(repo: &Repository, tx: &mut Transaction, sme_id: EntityId) -> ServerResult<Row<KillJob>> {
    let entity = repo.entities.get(tx, sme_id)?;
    if !entity.state.is_active() {
        return Err(ServerError::common(format!(
            "Job {sme_id} is not running (state {})",
            entity.state
        )));
    }
    let row = repo
        .kill_jobs
        .create(tx, KillJob::submitted(sme_id, entity.scope_id))?;
    info!(kill_id = %row.id, job_id = %sme_id, "Kill requested");
    Ok(row)
}

/// Suspends an entity. Its descendants count one more suspended ancestor.
pub fn suspend(repo: &Repository, tx: &mut Transaction, id: EntityId) -> ServerResult<()> {
    let entity = repo.entities.get(tx, id)?;
    if entity.is_suspended {
        return Ok(());
    }
    repo.entities.modify(tx, id, |e| e.is_suspended = true)?;
    adjust_descendants(repo, tx, id, true)?;
    debug!(job_id = %id, "Job suspended");
    Ok(())
}

/// Resumes a suspended entity.
pub fn resume(repo: &Repository, tx: &mut Transaction, id: EntityId) -> ServerResult<()> {
    let entity = repo.entities.get(tx, id)?;
    if !entity.is_suspended {
        return Ok(());
    }
    repo.entities.modify(tx, id, |e| e.is_suspended = false)?;
    adjust_descendants(repo, tx, id, false)?;
    debug!(job_id = %id, "Job resumed");
    Ok(())
}

fn adjust_descendants(
    repo: &Repository,
    tx: &mut Transaction,
    id: EntityId,
    suspended: bool,
) -> ServerResult<()> {
    let mut pending = vec![id];
    while let Some(parent) = pending.pop() {
        for child in repo.entities.get_vector(tx, &ENTITY_BY_PARENT, &key![Some(parent)])? {
            repo.entities.modify(tx, child.id, |e| {
                e.parent_suspended = if suspended {
                    e.parent_suspended + 1
                } else {
                    e.parent_suspended.saturating_sub(1)
                };
            })?;
            pending.push(child.id);
        }
    }
    Ok(())
}

/// Adds `u_id` to group `g_id`. Adding an existing member is a no-op.
pub fn add_member(repo: &Repository, tx: &mut Transaction, g_id: EntityId, u_id: EntityId) -> ServerResult<()> {
    match repo.members.create(tx, Member { g_id, u_id }) {
        Ok(_) => Ok(()),
        Err(RepoError::DuplicateKey { .. }) => {
            debug!(group = %g_id, user = %u_id, "Already a member");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Removes `u_id` from group `g_id`. Returns false when it was not a member.
pub fn remove_member(repo: &Repository, tx: &mut Transaction, g_id: EntityId, u_id: EntityId) -> ServerResult<bool> {
    match repo
        .members
        .get_unique(tx, &MEMBER_BY_GROUP_USER, &key![g_id, u_id])
    {
        Ok(member) => {
            repo.members.delete(tx, member.id)?;
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Whether `u_id` belongs to group `g_id`.
pub fn is_member(repo: &Repository, tx: &Transaction, g_id: EntityId, u_id: EntityId) -> ServerResult<bool> {
    match repo
        .members
        .get_unique(tx, &MEMBER_BY_GROUP_USER, &key![g_id, u_id])
    {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
