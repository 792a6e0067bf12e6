//! The scheduler's tables.

use sched_repository::{Database, RepoResult, Table, Transaction, TxContext, TxMode};

use crate::model::{KillJob, Member, RunnableQueueEntry, Scope, SubmittedEntity};

/// One handle per scheduler table over a shared [`Database`].
///
/// Constructed once per process and cloned into every component that needs
/// repository access.
#[derive(Debug, Clone)]
pub struct Repository {
    db: Database,
    pub scopes: Table<Scope>,
    pub entities: Table<SubmittedEntity>,
    pub kill_jobs: Table<KillJob>,
    pub queue: Table<RunnableQueueEntry>,
    pub members: Table<Member>,
}

impl Repository {
    pub fn new() -> RepoResult<Self> {
        Self::with_database(Database::new())
    }

    /// Registers every scheduler table in `db`.
    pub fn with_database(db: Database) -> RepoResult<Self> {
        Ok(Self {
            scopes: db.table()?,
            entities: db.table()?,
            kill_jobs: db.table()?,
            queue: db.table()?,
            members: db.table()?,
            db,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn begin(&self, context: TxContext, mode: TxMode) -> Transaction {
        self.db.begin(context, mode)
    }

    /// Read-write transaction on behalf of the server itself.
    pub fn begin_system(&self) -> Transaction {
        self.db.begin(TxContext::system(), TxMode::ReadWrite)
    }
}
