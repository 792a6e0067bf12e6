//! Job state machine.

use serde::{Deserialize, Serialize};

/// Scheduling state of a submitted entity or kill job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    DependencyWait,
    ResourceWait,
    Runnable,
    Starting,
    Started,
    Running,
    Finished,
    Final,
    Cancelled,
    Error,
    BrokenFinished,
}

impl JobState {
    /// Stable numeric code used in index keys.
    pub const fn code(self) -> i64 {
        match self {
            JobState::Submitted => 0,
            JobState::DependencyWait => 1,
            JobState::ResourceWait => 2,
            JobState::Runnable => 3,
            JobState::Starting => 4,
            JobState::Started => 5,
            JobState::Running => 6,
            JobState::Finished => 7,
            JobState::Final => 8,
            JobState::Cancelled => 9,
            JobState::Error => 10,
            JobState::BrokenFinished => 11,
        }
    }

    /// `Final` and `Cancelled`: no dispatch and no job-side reconnection.
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobState::Final | JobState::Cancelled)
    }

    /// States a runnable queue entry may be in.
    pub const fn is_queued(self) -> bool {
        matches!(self, JobState::Runnable | JobState::Starting)
    }

    /// States in which the job process is alive on its job server.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Starting | JobState::Started | JobState::Running
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            JobState::Submitted => "SUBMITTED",
            JobState::DependencyWait => "DEPENDENCY_WAIT",
            JobState::ResourceWait => "RESOURCE_WAIT",
            JobState::Runnable => "RUNNABLE",
            JobState::Starting => "STARTING",
            JobState::Started => "STARTED",
            JobState::Running => "RUNNING",
            JobState::Finished => "FINISHED",
            JobState::Final => "FINAL",
            JobState::Cancelled => "CANCELLED",
            JobState::Error => "ERROR",
            JobState::BrokenFinished => "BROKEN_FINISHED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
