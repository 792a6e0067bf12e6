//! History compaction worker.
//!
//! Periodically prunes row versions and index entries that no open
//! transaction can still see.

use std::time::Duration;

use sched_repository::Database;
use tokio::sync::watch;
use tracing::{error, info, instrument};

#[derive(Debug, Clone)]
pub struct CompactionWorkerConfig {
    pub interval: Duration,
}

impl Default for CompactionWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

pub struct CompactionWorker {
    db: Database,
    config: CompactionWorkerConfig,
}

impl CompactionWorker {
    pub fn new(db: Database, config: CompactionWorkerConfig) -> Self {
        Self { db, config }
    }

    /// Run the compaction worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting compaction worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_compaction().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Compaction worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_compaction(&self) {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || db.compact_history()).await {
            Ok(stats) => {
                let pruned: usize = stats.iter().map(|s| s.versions_pruned).sum();
                if pruned > 0 {
                    info!(versions_pruned = pruned, "Compaction pass complete");
                }
            }
            Err(e) => error!(error = %e, "Compaction panicked"),
        }
    }
}
