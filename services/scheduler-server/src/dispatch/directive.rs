//! Directives returned to polling job servers.

use std::collections::BTreeMap;

use sched_id::{AccessKey, EntityId};
use serde::{Deserialize, Serialize};

/// What a job server should do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Directive {
    Shutdown,
    ConfigPush { config: BTreeMap<String, String> },
    NoOp,
    JobStart(JobStartPayload),
    KillStart(KillStartPayload),
}

impl Directive {
    pub fn is_no_op(&self) -> bool {
        matches!(self, Directive::NoOp)
    }
}

/// Everything a job server needs to launch a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStartPayload {
    pub job_id: EntityId,
    pub job_name: String,
    /// Token the job process presents when it reconnects.
    pub access_key: AccessKey,
}

/// Everything a job server needs to run a kill request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillStartPayload {
    pub kill_id: EntityId,
    /// Entity to terminate.
    pub job_id: EntityId,
}
