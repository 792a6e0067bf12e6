//! Scheduler background worker.
//!
//! Runs the scheduling pass on a periodic interval so queued work is ready
//! before job servers poll for it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::dispatch::SchedulingPass;
use crate::error::ServerResult;
use crate::repository::Repository;

#[derive(Debug, Clone)]
pub struct SchedulerWorkerConfig {
    pub interval: Duration,
}

impl Default for SchedulerWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Scheduler worker that runs the scheduling pass in its own transaction.
pub struct SchedulerWorker {
    repo: Repository,
    scheduler: Arc<dyn SchedulingPass>,
    config: SchedulerWorkerConfig,
}

impl SchedulerWorker {
    pub fn new(repo: Repository, scheduler: Arc<dyn SchedulingPass>, config: SchedulerWorkerConfig) -> Self {
        Self {
            repo,
            scheduler,
            config,
        }
    }

    /// Run the scheduler worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting scheduler worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_pass().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_pass(&self) {
        let repo = self.repo.clone();
        let scheduler = Arc::clone(&self.scheduler);
        let result = tokio::task::spawn_blocking(move || run_pass_blocking(&repo, scheduler.as_ref())).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Scheduling pass failed"),
            Err(e) => error!(error = %e, "Scheduling pass panicked"),
        }
    }
}

/// One pass in one committed transaction.
pub fn run_pass_blocking(repo: &Repository, scheduler: &dyn SchedulingPass) -> ServerResult<()> {
    let mut tx = repo.begin_system();
    scheduler.run_scheduling_pass(&mut tx, repo)?;
    tx.commit()?;
    Ok(())
}
