//! Submitted entities: schedulable units of work.

use chrono::{DateTime, Utc};
use sched_id::{AccessKey, EntityId};
use sched_repository::{key, IndexDef, Record};
use serde::{Deserialize, Serialize};

use super::JobState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedEntity {
    pub job_name: String,
    /// Job server the entity runs on, once known.
    pub scope_id: Option<EntityId>,
    /// Enclosing entity in the submission tree.
    pub parent_id: Option<EntityId>,
    pub state: JobState,
    #[serde(default)]
    pub is_suspended: bool,
    /// Number of suspended ancestors.
    #[serde(default)]
    pub parent_suspended: u32,
    /// Set when the entity becomes runnable. Earliest is dispatched first.
    #[serde(default)]
    pub runnable_ts: Option<DateTime<Utc>>,
    pub access_key: AccessKey,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl SubmittedEntity {
    /// A freshly submitted entity with a new access key.
    pub fn submitted(
        job_name: impl Into<String>,
        scope_id: Option<EntityId>,
        parent_id: Option<EntityId>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            scope_id,
            parent_id,
            state: JobState::Submitted,
            is_suspended: false,
            parent_suspended: 0,
            runnable_ts: None,
            access_key: AccessKey::generate(),
            error_msg: None,
            exit_code: None,
        }
    }

    /// Neither the entity nor any ancestor is suspended.
    pub fn is_dispatchable(&self) -> bool {
        !self.is_suspended && self.parent_suspended == 0
    }
}

pub const ENTITY_BY_STATE: IndexDef<SubmittedEntity> =
    IndexDef::ordinary("submitted_entity_by_state", |e| key![e.state.code()]);
pub const ENTITY_BY_PARENT: IndexDef<SubmittedEntity> =
    IndexDef::ordinary("submitted_entity_by_parent", |e| key![e.parent_id]);

impl Record for SubmittedEntity {
    const TABLE: &'static str = "submitted_entity";
    const INDEXES: &'static [IndexDef<Self>] = &[ENTITY_BY_STATE, ENTITY_BY_PARENT];
}
