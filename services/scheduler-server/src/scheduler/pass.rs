//! Default scheduling pass.

use sched_repository::{key, Transaction};
use tracing::{debug, info};

use crate::dispatch::{DispatchTarget, SchedulingPass};
use crate::error::ServerResult;
use crate::model::{JobState, RunnableQueueEntry, ENTITY_BY_STATE, KILL_JOB_BY_STATE};
use crate::repository::Repository;

/// Counts from one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub entities_promoted: usize,
    pub kill_jobs_promoted: usize,
    pub entries_pruned: usize,
}

/// Promotes submitted work that names a scope straight to `Runnable` and
/// keeps the runnable queue in line with the rows it points at.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueScheduler;

impl QueueScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, tx: &mut Transaction, repo: &Repository) -> ServerResult<PassStats> {
        let mut stats = PassStats {
            entries_pruned: self.prune_queue(tx, repo)?,
            ..PassStats::default()
        };
        let now = tx.now();
        let submitted = key![JobState::Submitted.code()];

        for entity in repo.entities.get_vector(tx, &ENTITY_BY_STATE, &submitted)? {
            let Some(scope_id) = entity.scope_id else {
                debug!(job_id = %entity.id, "Submitted job has no scope yet");
                continue;
            };
            repo.entities.modify(tx, entity.id, |e| {
                e.state = JobState::Runnable;
                e.runnable_ts = Some(now);
            })?;
            repo.queue.create(
                tx,
                RunnableQueueEntry::new(scope_id, JobState::Runnable, entity.id),
            )?;
            stats.entities_promoted += 1;
        }

        for kill in repo.kill_jobs.get_vector(tx, &KILL_JOB_BY_STATE, &submitted)? {
            let Some(scope_id) = kill.scope_id else {
                debug!(kill_id = %kill.id, "Kill job has no scope");
                continue;
            };
            repo.kill_jobs.modify(tx, kill.id, |k| {
                k.state = JobState::Runnable;
                k.runnable_ts = Some(now);
            })?;
            repo.queue.create(
                tx,
                RunnableQueueEntry::new(scope_id, JobState::Runnable, kill.id),
            )?;
            stats.kill_jobs_promoted += 1;
        }
        Ok(stats)
    }

    /// Drops entries whose target vanished or left the queued states.
    fn prune_queue(&self, tx: &mut Transaction, repo: &Repository) -> ServerResult<usize> {
        let mut pruned = 0;
        for entry in repo.queue.scan(tx) {
            let live = DispatchTarget::resolve(repo, tx, entry.sme_id)
                .is_some_and(|target| target.state().is_queued());
            if !live {
                repo.queue.delete(tx, entry.id)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

impl SchedulingPass for QueueScheduler {
    fn run_scheduling_pass(&self, tx: &mut Transaction, repo: &Repository) -> ServerResult<()> {
        let stats = self.run(tx, repo)?;
        if stats != PassStats::default() {
            info!(
                entities_promoted = stats.entities_promoted,
                kill_jobs_promoted = stats.kill_jobs_promoted,
                entries_pruned = stats.entries_pruned,
                "Scheduling pass complete"
            );
        }
        Ok(())
    }
}
