//! Startup load from a JSON snapshot.

use std::path::Path;

use anyhow::{Context, Result};
use sched_repository::{LoadStats, LoadedRow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{KillJob, Member, RunnableQueueEntry, Scope, SubmittedEntity};
use crate::repository::Repository;

/// Durable rows for every scheduler table.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub scopes: Vec<LoadedRow<Scope>>,
    #[serde(default)]
    pub entities: Vec<LoadedRow<SubmittedEntity>>,
    #[serde(default)]
    pub kill_jobs: Vec<LoadedRow<KillJob>>,
    #[serde(default)]
    pub queue: Vec<LoadedRow<RunnableQueueEntry>>,
    #[serde(default)]
    pub members: Vec<LoadedRow<Member>>,
}

impl Snapshot {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))
    }

    /// Loads every table. Must run before the first transaction begins.
    pub fn load_into(self, repo: &Repository) -> Result<Vec<LoadStats>> {
        let stats = vec![
            repo.scopes.load(self.scopes)?,
            repo.entities.load(self.entities)?,
            repo.kill_jobs.load(self.kill_jobs)?,
            repo.queue.load(self.queue)?,
            repo.members.load(self.members)?,
        ];
        Ok(stats)
    }
}

/// Reads the snapshot at `path` and loads it into `repo`.
pub fn load_snapshot(repo: &Repository, path: &Path) -> Result<Vec<LoadStats>> {
    let stats = Snapshot::read(path)?.load_into(repo)?;
    let loaded: usize = stats.iter().map(|s| s.loaded).sum();
    info!(path = %path.display(), rows = loaded, "Snapshot loaded");
    Ok(stats)
}
