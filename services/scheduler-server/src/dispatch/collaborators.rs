//! Interfaces the dispatcher calls out to.

use sched_id::EntityId;
use sched_repository::{RepoError, Row, Transaction};
use thiserror::Error;

use super::Directive;
use crate::error::ServerResult;
use crate::model::{JobState, KillJob, SubmittedEntity};
use crate::repository::Repository;

/// Promotes work toward `Runnable` across every scope.
///
/// Runs synchronously inside the caller's transaction, so whatever it
/// stages is visible to the caller's next read.
pub trait SchedulingPass: Send + Sync {
    fn run_scheduling_pass(&self, tx: &mut Transaction, repo: &Repository) -> ServerResult<()>;
}

/// Why a start attempt failed.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("{table} {id} cannot be started in state {state}")]
    IllegalState {
        table: &'static str,
        id: EntityId,
        state: JobState,
    },

    #[error("start rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Performs the state changes that hand a job to its job server.
pub trait JobStarter: Send + Sync {
    fn start_job(
        &self,
        tx: &mut Transaction,
        repo: &Repository,
        entity: &Row<SubmittedEntity>,
        scope_id: EntityId,
    ) -> Result<Directive, StartError>;

    fn start_kill_job(
        &self,
        tx: &mut Transaction,
        repo: &Repository,
        kill: &Row<KillJob>,
        scope_id: EntityId,
    ) -> Result<Directive, StartError>;
}

/// Tracks scopes that have gone quiet.
pub trait LivenessTracker: Send + Sync {
    /// Called whenever the scope has just been served.
    fn deregister(&self, scope_id: EntityId);
}
