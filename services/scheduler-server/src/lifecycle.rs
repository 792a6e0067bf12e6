//! State changes reported by job servers and job processes.

use sched_id::EntityId;
use sched_repository::{key, RepoResult, Transaction};
use tracing::info;

use crate::dispatch::DispatchTarget;
use crate::error::{ServerError, ServerResult};
use crate::model::{JobState, QUEUE_BY_SME};
use crate::repository::Repository;
use crate::session::{Session, SessionRole};

/// Deletes every queue entry pointing at `id`. Returns how many.
pub fn remove_queue_entries(repo: &Repository, tx: &mut Transaction, id: EntityId) -> RepoResult<usize> {
    let entries = repo.queue.get_vector(tx, &QUEUE_BY_SME, &key![id])?;
    for entry in &entries {
        repo.queue.delete(tx, entry.id)?;
    }
    Ok(entries.len())
}

/// Moves the target into `Error`, recording `message`, and takes it out of
/// the queue.
pub fn set_to_error(
    repo: &Repository,
    tx: &mut Transaction,
    target: &DispatchTarget,
    message: &str,
) -> ServerResult<()> {
    let id = target.id();
    match target {
        DispatchTarget::Entity(_) => {
            repo.entities.modify(tx, id, |e| {
                e.state = JobState::Error;
                e.error_msg = Some(message.to_string());
            })?;
        }
        DispatchTarget::Kill(_) => {
            repo.kill_jobs.modify(tx, id, |k| {
                k.state = JobState::Error;
                k.error_msg = Some(message.to_string());
            })?;
        }
    }
    remove_queue_entries(repo, tx, id)?;
    Ok(())
}

/// The job process for `id` is up.
pub fn report_started(
    repo: &Repository,
    tx: &mut Transaction,
    session: &Session,
    id: EntityId,
) -> ServerResult<()> {
    session.require_role(&[SessionRole::JobServer, SessionRole::Job])?;
    let target = resolve(repo, tx, id)?;
    if !matches!(target.state(), JobState::Starting | JobState::Started) {
        return Err(ServerError::common(format!(
            "Job {id} cannot change from {} to {}",
            target.state(),
            JobState::Running
        )));
    }
    set_state(repo, tx, &target, JobState::Running, None)?;
    remove_queue_entries(repo, tx, id)?;
    info!(job_id = %id, "Job running");
    Ok(())
}

/// The job process for `id` exited with `exit_code`.
pub fn report_finished(
    repo: &Repository,
    tx: &mut Transaction,
    session: &Session,
    id: EntityId,
    exit_code: i32,
) -> ServerResult<()> {
    session.require_role(&[SessionRole::JobServer, SessionRole::Job])?;
    let target = resolve(repo, tx, id)?;
    if !target.state().is_active() {
        return Err(ServerError::common(format!(
            "Job {id} cannot change from {} to {}",
            target.state(),
            JobState::Final
        )));
    }
    set_state(repo, tx, &target, JobState::Final, Some(exit_code))?;
    remove_queue_entries(repo, tx, id)?;
    info!(job_id = %id, exit_code, "Job finished");
    Ok(())
}

fn resolve(repo: &Repository, tx: &Transaction, id: EntityId) -> ServerResult<DispatchTarget> {
    DispatchTarget::resolve(repo, tx, id)
        .ok_or_else(|| ServerError::common(format!("Job {id} not found")))
}

fn set_state(
    repo: &Repository,
    tx: &mut Transaction,
    target: &DispatchTarget,
    state: JobState,
    exit_code: Option<i32>,
) -> ServerResult<()> {
    match target {
        DispatchTarget::Entity(row) => {
            repo.entities.modify(tx, row.id, |e| {
                e.state = state;
                if exit_code.is_some() {
                    e.exit_code = exit_code;
                }
            })?;
        }
        DispatchTarget::Kill(row) => {
            repo.kill_jobs.modify(tx, row.id, |k| {
                k.state = state;
                if exit_code.is_some() {
                    k.exit_code = exit_code;
                }
            })?;
        }
    }
    Ok(())
}
