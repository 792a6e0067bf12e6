//! The per-poll dispatch decision.

use std::sync::Arc;

use sched_id::EntityId;
use sched_repository::{Transaction, TxMode};
use tracing::{debug, error, info, instrument, warn};

use super::{Directive, DispatchTarget, JobStarter, LivenessTracker, SchedulingPass};
use crate::error::{ServerError, ServerResult};
use crate::lifecycle;
use crate::model::{scope_state_key, JobState, QUEUE_BY_SCOPE_STATE};
use crate::repository::Repository;
use crate::scopes;
use crate::session::{Session, SessionRole};

/// Result of one search attempt.
enum Search {
    Found(Directive),
    /// The start attempt failed and the target was moved to `Error`.
    Retry,
}

/// Decides what a polling job server runs next.
pub struct JobDispatcher {
    repo: Repository,
    scheduler: Arc<dyn SchedulingPass>,
    starter: Arc<dyn JobStarter>,
    liveness: Arc<dyn LivenessTracker>,
}

impl JobDispatcher {
    pub fn new(
        repo: Repository,
        scheduler: Arc<dyn SchedulingPass>,
        starter: Arc<dyn JobStarter>,
        liveness: Arc<dyn LivenessTracker>,
    ) -> Self {
        Self {
            repo,
            scheduler,
            starter,
            liveness,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Serves one poll of `scope_id` in its own transaction.
    #[instrument(skip(self, session), fields(scope_id = %scope_id))]
    pub fn poll_directive(&self, session: &Session, scope_id: EntityId) -> ServerResult<Directive> {
        session.require_role(&[SessionRole::JobServer])?;
        let mut tx = self.repo.begin(session.context(), TxMode::ReadWrite);
        let directive = self.poll_in(&mut tx, scope_id)?;
        tx.commit()?;
        Ok(directive)
    }

    /// Serves one poll inside the caller's transaction.
    ///
    /// Pending signals on the scope win over work: a shutdown request first,
    /// then a changed configuration. A suspended or unregistered scope gets
    /// a no-op. Otherwise the queue is searched until a search produces a
    /// directive; a failed start moves its target out of the queue, so every
    /// retry sees less work.
    pub fn poll_in(&self, tx: &mut Transaction, scope_id: EntityId) -> ServerResult<Directive> {
        let directive = match self.pending_signal(tx, scope_id)? {
            Some(directive) => directive,
            None => loop {
                if let Search::Found(directive) = self.search_next_job(tx, scope_id)? {
                    break directive;
                }
            },
        };

        self.liveness.deregister(scope_id);
        let now = tx.now();
        self.repo
            .scopes
            .modify(tx, scope_id, |scope| scope.last_active = Some(now))?;
        debug!(directive = ?directive, "Poll served");
        Ok(directive)
    }

    /// Shutdown, config push or no-op for a scope that must not get work.
    ///
    /// The flag is cleared in the same sub-transaction that reads it, so a
    /// signal is delivered at most once.
    fn pending_signal(&self, tx: &mut Transaction, scope_id: EntityId) -> ServerResult<Option<Directive>> {
        tx.sub(|tx| {
            let scope = self.repo.scopes.get(tx, scope_id)?;
            if scope.is_terminate {
                self.repo
                    .scopes
                    .modify(tx, scope_id, |s| s.is_terminate = false)?;
                info!("Delivering shutdown to job server");
                return Ok(Some(Directive::Shutdown));
            }
            if scope.has_altered_config {
                let config = scopes::effective_config(&self.repo, tx, scope_id)?;
                self.repo
                    .scopes
                    .modify(tx, scope_id, |s| s.has_altered_config = false)?;
                info!(items = config.len(), "Pushing configuration to job server");
                return Ok(Some(Directive::ConfigPush { config }));
            }
            if scope.is_suspended || !scope.is_registered {
                return Ok(Some(Directive::NoOp));
            }
            Ok(None)
        })
    }

    fn search_next_job(&self, tx: &mut Transaction, scope_id: EntityId) -> ServerResult<Search> {
        tx.begin_sub();
        match self.search_in_sub(tx, scope_id) {
            Ok(search) => {
                tx.commit_sub()?;
                Ok(search)
            }
            Err(e) => {
                tx.rollback_sub()?;
                Err(e)
            }
        }
    }

    /// Runs with the search's sub-transaction open and leaves it open.
    fn search_in_sub(&self, tx: &mut Transaction, scope_id: EntityId) -> ServerResult<Search> {
        let Some(target) = self.pick_target(tx, scope_id)? else {
            debug!("No dispatchable work");
            return Ok(Search::Found(Directive::NoOp));
        };

        tx.begin_sub();
        let attempt = match &target {
            DispatchTarget::Entity(entity) => {
                self.starter.start_job(tx, &self.repo, entity, scope_id)
            }
            DispatchTarget::Kill(kill) => self.starter.start_kill_job(tx, &self.repo, kill, scope_id),
        };
        match attempt {
            Ok(directive) => {
                tx.commit_sub()?;
                Ok(Search::Found(directive))
            }
            Err(e) => {
                tx.rollback_sub()?;
                error!(
                    target_id = %target.id(),
                    state = %target.state(),
                    error = %e,
                    "Start attempt failed"
                );
                lifecycle::set_to_error(&self.repo, tx, &target, &e.to_string())?;
                Ok(Search::Retry)
            }
        }
    }

    /// Picks the next target for `scope_id`.
    ///
    /// `Starting` entries win outright, first found. Among `Runnable`
    /// entries the earliest `runnable_ts` wins; on equal timestamps the
    /// entry found first in index order keeps the slot. When no runnable
    /// entry is eligible the scheduling pass runs once between two
    /// sub-transactions and the queue is scanned again.
    fn pick_target(&self, tx: &mut Transaction, scope_id: EntityId) -> ServerResult<Option<DispatchTarget>> {
        let starting_key = scope_state_key(scope_id, JobState::Starting);
        for entry in self.repo.queue.get_vector(tx, &QUEUE_BY_SCOPE_STATE, &starting_key)? {
            match DispatchTarget::resolve(&self.repo, tx, entry.sme_id) {
                Some(target) => return Ok(Some(target)),
                None => warn!(entry_id = %entry.id, sme_id = %entry.sme_id, "Stale starting queue entry"),
            }
        }

        let runnable_key = scope_state_key(scope_id, JobState::Runnable);
        let mut entries = {
            let repo = &self.repo;
            let reader: &Transaction = tx;
            repo.queue
                .get_vector_filtered(reader, &QUEUE_BY_SCOPE_STATE, &runnable_key, |entry| {
                    Ok::<_, ServerError>(
                        DispatchTarget::resolve(repo, reader, entry.sme_id)
                            .map_or(true, |target| target.is_dispatchable()),
                    )
                })?
        };

        if entries.is_empty() {
            tx.commit_sub()?;
            debug!("No eligible runnable entries, running scheduling pass");
            let pass = self.scheduler.run_scheduling_pass(tx, &self.repo);
            tx.begin_sub();
            pass.map_err(|e| match e {
                ServerError::Scheduling(_) => e,
                other => ServerError::Scheduling(other.to_string()),
            })?;
            entries = self.repo.queue.get_vector(tx, &QUEUE_BY_SCOPE_STATE, &runnable_key)?;
        }

        let mut best: Option<DispatchTarget> = None;
        let mut candidates = 0usize;
        for entry in &entries {
            let Some(target) = DispatchTarget::resolve(&self.repo, tx, entry.sme_id) else {
                warn!(entry_id = %entry.id, sme_id = %entry.sme_id, "Stale runnable queue entry");
                continue;
            };
            if !target.is_dispatchable() {
                continue;
            }
            candidates += 1;
            if let Some(current) = &best {
                if target.dispatch_ts() >= current.dispatch_ts() {
                    continue;
                }
            }
            best = Some(target);
        }
        if candidates > 1 {
            info!(candidates, "Multiple runnable candidates for scope");
        }
        Ok(best)
    }
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}
