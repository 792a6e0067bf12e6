//! Per-scope dispatch queue.

use sched_id::EntityId;
use sched_repository::{key, IndexDef, Key, Record};
use serde::{Deserialize, Serialize};

use super::JobState;

/// Membership of an entity or kill job in a scope's dispatch queue.
///
/// Entries can lag behind the row they point at, so dispatch always
/// re-reads the target before acting on one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnableQueueEntry {
    pub scope_id: EntityId,
    pub state: JobState,
    /// Submitted entity or kill job id.
    pub sme_id: EntityId,
}

impl RunnableQueueEntry {
    pub fn new(scope_id: EntityId, state: JobState, sme_id: EntityId) -> Self {
        Self {
            scope_id,
            state,
            sme_id,
        }
    }
}

/// Key of the `(scope, state)` slice of the queue.
pub fn scope_state_key(scope_id: EntityId, state: JobState) -> Key {
    key![scope_id, state.code()]
}

pub const QUEUE_BY_SCOPE_STATE: IndexDef<RunnableQueueEntry> =
    IndexDef::ordinary("runnable_queue_by_scope_state", |q| {
        scope_state_key(q.scope_id, q.state)
    });
pub const QUEUE_BY_SME: IndexDef<RunnableQueueEntry> =
    IndexDef::ordinary("runnable_queue_by_sme", |q| key![q.sme_id]);

impl Record for RunnableQueueEntry {
    const TABLE: &'static str = "runnable_queue";
    const INDEXES: &'static [IndexDef<Self>] = &[QUEUE_BY_SCOPE_STATE, QUEUE_BY_SME];
}
