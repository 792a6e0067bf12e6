//! Repository record types.

mod job_state;
mod kill_job;
mod member;
mod runnable_queue;
mod scope;
mod submitted_entity;

pub use job_state::JobState;
pub use kill_job::{KillJob, KILL_JOB_BY_SME, KILL_JOB_BY_STATE};
pub use member::{Member, MEMBER_BY_GROUP, MEMBER_BY_GROUP_USER, MEMBER_BY_USER};
pub use runnable_queue::{scope_state_key, RunnableQueueEntry, QUEUE_BY_SCOPE_STATE, QUEUE_BY_SME};
pub use scope::{Scope, ScopeKind, SCOPE_BY_PARENT, SCOPE_BY_PARENT_NAME};
pub use submitted_entity::{SubmittedEntity, ENTITY_BY_PARENT, ENTITY_BY_STATE};
