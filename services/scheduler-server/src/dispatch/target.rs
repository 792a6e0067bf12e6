//! Resolution of queue entries to the rows they stand for.

use chrono::{DateTime, Utc};
use sched_id::EntityId;
use sched_repository::{Row, Transaction};

use crate::model::{JobState, KillJob, SubmittedEntity};
use crate::repository::Repository;

/// The row a runnable queue entry points at.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchTarget {
    Entity(Row<SubmittedEntity>),
    Kill(Row<KillJob>),
}

impl DispatchTarget {
    /// Looks `id` up as a submitted entity, then as a kill job. Both share
    /// one id space, so at most one lookup can succeed.
    pub fn resolve(repo: &Repository, tx: &Transaction, id: EntityId) -> Option<Self> {
        if let Some(entity) = repo.entities.try_get(tx, id) {
            return Some(DispatchTarget::Entity(entity));
        }
        repo.kill_jobs.try_get(tx, id).map(DispatchTarget::Kill)
    }

    pub fn id(&self) -> EntityId {
        match self {
            DispatchTarget::Entity(row) => row.id,
            DispatchTarget::Kill(row) => row.id,
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            DispatchTarget::Entity(row) => row.state,
            DispatchTarget::Kill(row) => row.state,
        }
    }

    pub fn runnable_ts(&self) -> Option<DateTime<Utc>> {
        match self {
            DispatchTarget::Entity(row) => row.runnable_ts,
            DispatchTarget::Kill(row) => row.runnable_ts,
        }
    }

    /// Suspension only holds back entities; kill jobs always go through.
    pub fn is_dispatchable(&self) -> bool {
        match self {
            DispatchTarget::Entity(row) => row.is_dispatchable(),
            DispatchTarget::Kill(_) => true,
        }
    }

    /// Ordering key for the runnable tie-break. Targets without a timestamp
    /// sort last.
    pub(crate) fn dispatch_ts(&self) -> DateTime<Utc> {
        self.runnable_ts().unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
