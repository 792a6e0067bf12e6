//! Default job starter.

use sched_id::EntityId;
use sched_repository::{key, RepoResult, Row, Transaction};
use tracing::debug;

use crate::dispatch::{Directive, JobStartPayload, JobStarter, KillStartPayload, StartError};
use crate::model::{JobState, KillJob, SubmittedEntity, QUEUE_BY_SME};
use crate::repository::Repository;

/// Moves a runnable target to `Starting` and hands out its start payload.
///
/// A target already `Starting` gets its payload again: the job server asked
/// twice because the first answer never reached it.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueJobStarter;

impl QueueJobStarter {
    pub fn new() -> Self {
        Self
    }
}

impl JobStarter for QueueJobStarter {
    fn start_job(
        &self,
        tx: &mut Transaction,
        repo: &Repository,
        entity: &Row<SubmittedEntity>,
        scope_id: EntityId,
    ) -> Result<Directive, StartError> {
        match entity.state {
            JobState::Runnable => {
                repo.entities.modify(tx, entity.id, |e| {
                    e.state = JobState::Starting;
                    e.scope_id = Some(scope_id);
                })?;
                mark_starting(repo, tx, entity.id, scope_id)?;
                debug!(job_id = %entity.id, "Job starting");
            }
            JobState::Starting => {
                debug!(job_id = %entity.id, "Re-issuing start");
            }
            state => {
                return Err(StartError::IllegalState {
                    table: "submitted_entity",
                    id: entity.id,
                    state,
                })
            }
        }
        Ok(Directive::JobStart(JobStartPayload {
            job_id: entity.id,
            job_name: entity.job_name.clone(),
            access_key: entity.access_key,
        }))
    }

    fn start_kill_job(
        &self,
        tx: &mut Transaction,
        repo: &Repository,
        kill: &Row<KillJob>,
        scope_id: EntityId,
    ) -> Result<Directive, StartError> {
        match kill.state {
            JobState::Runnable => {
                repo.kill_jobs
                    .modify(tx, kill.id, |k| k.state = JobState::Starting)?;
                mark_starting(repo, tx, kill.id, scope_id)?;
                debug!(kill_id = %kill.id, job_id = %kill.sme_id, "Kill job starting");
            }
            JobState::Starting => {
                debug!(kill_id = %kill.id, "Re-issuing kill start");
            }
            state => {
                return Err(StartError::IllegalState {
                    table: "kill_job",
                    id: kill.id,
                    state,
                })
            }
        }
        Ok(Directive::KillStart(KillStartPayload {
            kill_id: kill.id,
            job_id: kill.sme_id,
        }))
    }
}

/// Moves the target's queue entries on `scope_id` to the starting slice.
fn mark_starting(repo: &Repository, tx: &mut Transaction, id: EntityId, scope_id: EntityId) -> RepoResult<()> {
    for entry in repo.queue.get_vector(tx, &QUEUE_BY_SME, &key![id])? {
        if entry.scope_id == scope_id && entry.state != JobState::Starting {
            repo.queue
                .modify(tx, entry.id, |q| q.state = JobState::Starting)?;
        }
    }
    Ok(())
}
