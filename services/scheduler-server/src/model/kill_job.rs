//! Kill jobs: requests to terminate a running entity.

use chrono::{DateTime, Utc};
use sched_id::EntityId;
use sched_repository::{key, IndexDef, Record};
use serde::{Deserialize, Serialize};

use super::JobState;

/// A kill request. Competes with submitted entities for the dispatch slot of
/// the target's scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillJob {
    /// Entity to terminate.
    pub sme_id: EntityId,
    pub scope_id: Option<EntityId>,
    pub state: JobState,
    #[serde(default)]
    pub runnable_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl KillJob {
    pub fn submitted(sme_id: EntityId, scope_id: Option<EntityId>) -> Self {
        Self {
            sme_id,
            scope_id,
            state: JobState::Submitted,
            runnable_ts: None,
            error_msg: None,
            exit_code: None,
        }
    }
}

pub const KILL_JOB_BY_STATE: IndexDef<KillJob> =
    IndexDef::ordinary("kill_job_by_state", |k| key![k.state.code()]);
pub const KILL_JOB_BY_SME: IndexDef<KillJob> =
    IndexDef::ordinary("kill_job_by_sme", |k| key![k.sme_id]);

impl Record for KillJob {
    const TABLE: &'static str = "kill_job";
    const INDEXES: &'static [IndexDef<Self>] = &[KILL_JOB_BY_STATE, KILL_JOB_BY_SME];
}
