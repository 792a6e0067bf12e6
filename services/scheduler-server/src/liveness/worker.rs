//! Liveness background worker.
//!
//! Each tick puts quiet job servers on the ping list and disconnects the
//! ones whose deadline passed without a poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::PingList;
use crate::error::ServerResult;
use crate::repository::Repository;
use crate::scopes;

#[derive(Debug, Clone)]
pub struct LivenessWorkerConfig {
    pub interval: Duration,
}

impl Default for LivenessWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Counts from one liveness check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessStats {
    pub registered: usize,
    pub disconnected: usize,
}

pub struct LivenessWorker {
    repo: Repository,
    ping_list: Arc<PingList>,
    config: LivenessWorkerConfig,
}

impl LivenessWorker {
    pub fn new(repo: Repository, ping_list: Arc<PingList>, config: LivenessWorkerConfig) -> Self {
        Self {
            repo,
            ping_list,
            config,
        }
    }

    /// Run the liveness worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting liveness worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_check().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Liveness worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_check(&self) {
        let repo = self.repo.clone();
        let ping_list = Arc::clone(&self.ping_list);
        let result =
            tokio::task::spawn_blocking(move || check_liveness(&repo, &ping_list, Utc::now())).await;
        match result {
            Ok(Ok(stats)) if stats.disconnected > 0 => {
                warn!(
                    disconnected = stats.disconnected,
                    "Disconnected unresponsive job servers"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "Liveness check failed"),
            Err(e) => error!(error = %e, "Liveness check panicked"),
        }
    }
}

/// One liveness check at `now` in one committed transaction.
pub fn check_liveness(repo: &Repository, ping_list: &PingList, now: DateTime<Utc>) -> ServerResult<LivenessStats> {
    let mut tx = repo.begin_system();
    let mut stats = LivenessStats::default();

    for scope in repo.scopes.scan(&tx) {
        if !scope.is_server() || !scope.is_connected() {
            continue;
        }
        let timeout = scopes::session_timeout(repo, &tx, scope.id)?;
        let quiet = scope
            .last_active
            .is_none_or(|last| after(last, timeout) < now);
        if quiet && ping_list.register(scope.id, after(now, timeout)) {
            stats.registered += 1;
        }
    }

    for scope_id in ping_list.take_expired(now) {
        match scopes::disconnect_scope(repo, &mut tx, scope_id) {
            Ok(()) => stats.disconnected += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    tx.commit()?;
    Ok(stats)
}

fn after(t: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
