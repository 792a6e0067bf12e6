//! Fixtures shared by the scheduler-server integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sched_id::{EntityId, SessionId};
use sched_repository::{Row, Transaction, TxContext, TxMode};
use sched_server::dispatch::{
    Directive, JobDispatcher, JobStarter, LivenessTracker, SchedulingPass, StartError,
};
use sched_server::error::ServerResult;
use sched_server::model::{JobState, KillJob, RunnableQueueEntry, ScopeKind, SubmittedEntity};
use sched_server::repository::Repository;
use sched_server::scheduler::QueueScheduler;
use sched_server::scopes;
use sched_server::session::Session;
use sched_server::starter::QueueJobStarter;

/// Default scheduling pass that counts how often it ran.
#[derive(Debug, Default)]
pub struct CountingPass {
    inner: QueueScheduler,
    runs: AtomicUsize,
}

impl CountingPass {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl SchedulingPass for CountingPass {
    fn run_scheduling_pass(&self, tx: &mut Transaction, repo: &Repository) -> ServerResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run_scheduling_pass(tx, repo)
    }
}

/// Default starter that rejects a chosen set of ids.
#[derive(Debug, Default)]
pub struct FlakyStarter {
    inner: QueueJobStarter,
    reject: Mutex<HashSet<EntityId>>,
}

impl FlakyStarter {
    pub fn reject(&self, id: EntityId) {
        self.reject.lock().insert(id);
    }

    fn check(&self, id: EntityId) -> Result<(), StartError> {
        if self.reject.lock().contains(&id) {
            return Err(StartError::Rejected(format!("agent refused {id}")));
        }
        Ok(())
    }
}

impl JobStarter for FlakyStarter {
    fn start_job(
        &self,
        tx: &mut Transaction,
        repo: &Repository,
        entity: &Row<SubmittedEntity>,
        scope_id: EntityId,
    ) -> Result<Directive, StartError> {
        self.check(entity.id)?;
        self.inner.start_job(tx, repo, entity, scope_id)
    }

    fn start_kill_job(
        &self,
        tx: &mut Transaction,
        repo: &Repository,
        kill: &Row<KillJob>,
        scope_id: EntityId,
    ) -> Result<Directive, StartError> {
        self.check(kill.id)?;
        self.inner.start_kill_job(tx, repo, kill, scope_id)
    }
}

/// Records every deregistration.
#[derive(Debug, Default)]
pub struct RecordingLiveness {
    deregistered: Mutex<Vec<EntityId>>,
}

impl RecordingLiveness {
    pub fn deregistered(&self) -> Vec<EntityId> {
        self.deregistered.lock().clone()
    }
}

impl LivenessTracker for RecordingLiveness {
    fn deregister(&self, scope_id: EntityId) {
        self.deregistered.lock().push(scope_id);
    }
}

/// A repository, a dispatcher wired to recording collaborators, and
/// helpers that each run in their own committed transaction.
pub struct Harness {
    pub repo: Repository,
    pub pass: Arc<CountingPass>,
    pub starter: Arc<FlakyStarter>,
    pub liveness: Arc<RecordingLiveness>,
    pub dispatcher: JobDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        sched_testing::init_tracing();
        let repo = Repository::new().unwrap();
        let pass = Arc::new(CountingPass::default());
        let starter = Arc::new(FlakyStarter::default());
        let liveness = Arc::new(RecordingLiveness::default());
        let dispatcher = JobDispatcher::new(
            repo.clone(),
            pass.clone(),
            starter.clone(),
            liveness.clone(),
        );
        Self {
            repo,
            pass,
            starter,
            liveness,
            dispatcher,
        }
    }

    pub fn write<T>(&self, f: impl FnOnce(&Repository, &mut Transaction) -> ServerResult<T>) -> T {
        let mut tx = self.repo.begin_system();
        let value = f(&self.repo, &mut tx).unwrap();
        tx.commit().unwrap();
        value
    }

    pub fn read<T>(&self, f: impl FnOnce(&Repository, &Transaction) -> T) -> T {
        let tx = self.repo.begin(TxContext::system(), TxMode::ReadOnly);
        f(&self.repo, &tx)
    }

    pub fn scope(&self, name: &str, parent: Option<EntityId>) -> EntityId {
        self.write(|repo, tx| scopes::create_scope(repo, tx, name, parent, ScopeKind::Scope))
            .id
    }

    /// A connected job server scope.
    pub fn server(&self, name: &str, parent: Option<EntityId>) -> EntityId {
        let id = self
            .write(|repo, tx| scopes::create_scope(repo, tx, name, parent, ScopeKind::Server))
            .id;
        self.write(|repo, tx| scopes::connect_scope(repo, tx, id, SessionId::new()));
        id
    }

    /// An entity already queued as runnable on `scope_id`.
    pub fn runnable(&self, scope_id: EntityId, job_name: &str, runnable_ts: DateTime<Utc>) -> EntityId {
        self.queued(scope_id, job_name, JobState::Runnable, Some(runnable_ts))
    }

    pub fn queued(
        &self,
        scope_id: EntityId,
        job_name: &str,
        state: JobState,
        runnable_ts: Option<DateTime<Utc>>,
    ) -> EntityId {
        self.write(|repo, tx| {
            let entity = repo.entities.create(
                tx,
                SubmittedEntity {
                    state,
                    runnable_ts,
                    ..SubmittedEntity::submitted(job_name, Some(scope_id), None)
                },
            )?;
            repo.queue
                .create(tx, RunnableQueueEntry::new(scope_id, state, entity.id))?;
            Ok(entity.id)
        })
    }

    /// A kill job already queued as runnable for `sme_id`.
    pub fn runnable_kill(&self, scope_id: EntityId, sme_id: EntityId, runnable_ts: DateTime<Utc>) -> EntityId {
        self.write(|repo, tx| {
            let kill = repo.kill_jobs.create(
                tx,
                KillJob {
                    state: JobState::Runnable,
                    runnable_ts: Some(runnable_ts),
                    ..KillJob::submitted(sme_id, Some(scope_id))
                },
            )?;
            repo.queue.create(
                tx,
                RunnableQueueEntry::new(scope_id, JobState::Runnable, kill.id),
            )?;
            Ok(kill.id)
        })
    }

    pub fn poll(&self, scope_id: EntityId) -> Directive {
        self.dispatcher
            .poll_directive(&Session::job_server(scope_id), scope_id)
            .unwrap()
    }

    pub fn entity(&self, id: EntityId) -> Row<SubmittedEntity> {
        self.read(|repo, tx| repo.entities.get(tx, id).unwrap())
    }
}

/// The job id of a `JobStart` directive.
pub fn started_job(directive: &Directive) -> Option<EntityId> {
    match directive {
        Directive::JobStart(payload) => Some(payload.job_id),
        _ => None,
    }
}
