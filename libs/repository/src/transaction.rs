//! Transactions and nested sub-transactions.
//!
//! A [`Transaction`] reads a fixed snapshot of committed state and keeps its
//! own writes in a stack of frames: the bottom frame belongs to the outer
//! transaction, every open sub-transaction pushes one more. Reads look
//! through the frames top-down before falling back to the snapshot.
//!
//! - `commit_sub` folds the top frame into the one below it.
//! - `rollback_sub` drops the top frame, which undoes every version and
//!   index effect it staged in one step.
//! - `commit` publishes the bottom frame at the next version number.
//!
//! Read-write transactions hold the database's writer lock from `begin`
//! until they finish, so at most one is open at a time and its snapshot is
//! always the latest committed version. Read-only transactions never take
//! the lock.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sched_id::EntityId;
use tracing::{debug, error};

use crate::clock::WriterGuard;
use crate::database::Database;
use crate::error::{RepoError, RepoResult};
use crate::privilege::{AllowAll, PrivilegeChecker};
use crate::record::{Record, Row};
use crate::table::TableState;
use crate::version::VersionNumber;

/// Principal used by background work that acts on behalf of the server.
pub const SYSTEM_PRINCIPAL: EntityId = EntityId::new(0);

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Who is writing and how their writes are authorised.
#[derive(Clone)]
pub struct TxContext {
    principal: EntityId,
    privileges: Arc<dyn PrivilegeChecker>,
}

impl TxContext {
    pub fn new(principal: EntityId, privileges: Arc<dyn PrivilegeChecker>) -> Self {
        Self {
            principal,
            privileges,
        }
    }

    /// The server itself, allowed everything.
    pub fn system() -> Self {
        Self::new(SYSTEM_PRINCIPAL, Arc::new(AllowAll))
    }

    pub fn principal(&self) -> EntityId {
        self.principal
    }

    pub fn privileges(&self) -> &dyn PrivilegeChecker {
        self.privileges.as_ref()
    }
}

impl std::fmt::Debug for TxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// A staged write to one object.
#[derive(Debug, Clone)]
pub(crate) enum Change<R> {
    Created(Row<R>),
    Updated(Row<R>),
    Deleted,
}

impl<R> Change<R> {
    pub(crate) fn row(&self) -> Option<&Row<R>> {
        match self {
            Change::Created(row) | Change::Updated(row) => Some(row),
            Change::Deleted => None,
        }
    }
}

/// Folds a later change onto an earlier one for the same id.
fn combine<R>(earlier: Option<Change<R>>, later: Change<R>) -> Option<Change<R>> {
    match (earlier, later) {
        (Some(Change::Created(_)), Change::Updated(row)) => Some(Change::Created(row)),
        // Created and dropped inside the same transaction: nothing to publish.
        (Some(Change::Created(_)), Change::Deleted) => None,
        (_, later) => Some(later),
    }
}

/// Staged writes to one table within one frame.
pub(crate) struct ChangeSet<R: Record> {
    table: Arc<RwLock<TableState<R>>>,
    changes: BTreeMap<EntityId, Change<R>>,
}

impl<R: Record> ChangeSet<R> {
    fn new(table: Arc<RwLock<TableState<R>>>) -> Self {
        Self {
            table,
            changes: BTreeMap::new(),
        }
    }

    pub(crate) fn record(&mut self, id: EntityId, change: Change<R>) {
        let earlier = self.changes.remove(&id);
        if let Some(merged) = combine(earlier, change) {
            self.changes.insert(id, merged);
        }
    }

    pub(crate) fn get(&self, id: EntityId) -> Option<&Change<R>> {
        self.changes.get(&id)
    }
}

/// Type-erased view of a [`ChangeSet`] so frames can hold every table.
trait PendingChanges: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn table_name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn merge_into(self: Box<Self>, parent: &mut dyn PendingChanges);
    fn publish(self: Box<Self>, version: VersionNumber);
}

impl<R: Record> PendingChanges for ChangeSet<R> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn table_name(&self) -> &'static str {
        R::TABLE
    }

    fn len(&self) -> usize {
        self.changes.len()
    }

    fn merge_into(self: Box<Self>, parent: &mut dyn PendingChanges) {
        match parent.as_any_mut().downcast_mut::<ChangeSet<R>>() {
            Some(parent) => {
                for (id, change) in self.changes {
                    parent.record(id, change);
                }
            }
            None => error!(table = R::TABLE, "Change set type mismatch while merging"),
        }
    }

    fn publish(self: Box<Self>, version: VersionNumber) {
        let mut state = self.table.write();
        for (id, change) in self.changes {
            match change {
                Change::Created(row) | Change::Updated(row) => state.put(row, version),
                Change::Deleted => state.remove(id, version),
            }
        }
    }
}

/// Writes staged by the outer transaction or one sub-transaction.
#[derive(Default)]
struct Frame {
    tables: HashMap<TypeId, Box<dyn PendingChanges>>,
}

impl Frame {
    fn get<R: Record>(&self) -> Option<&ChangeSet<R>> {
        self.tables
            .get(&TypeId::of::<R>())
            .and_then(|pending| pending.as_any().downcast_ref::<ChangeSet<R>>())
    }

    fn change_count(&self) -> usize {
        self.tables.values().map(|pending| pending.len()).sum()
    }

    fn merge_into(self, parent: &mut Frame) {
        for (type_id, pending) in self.tables {
            match parent.tables.get_mut(&type_id) {
                Some(existing) => pending.merge_into(existing.as_mut()),
                None => {
                    parent.tables.insert(type_id, pending);
                }
            }
        }
    }
}

/// A unit of work against a [`Database`].
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back.
pub struct Transaction {
    db: Database,
    mode: TxMode,
    snapshot: VersionNumber,
    started_at: DateTime<Utc>,
    context: TxContext,
    frames: Vec<Frame>,
    _writer: Option<WriterGuard>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn begin(db: Database, context: TxContext, mode: TxMode) -> Self {
        let writer = match mode {
            TxMode::ReadWrite => Some(db.clock().acquire_writer()),
            TxMode::ReadOnly => None,
        };
        let snapshot = db.watermark().register_latest(db.clock());
        Self {
            db,
            mode,
            snapshot,
            started_at: Utc::now(),
            context,
            frames: vec![Frame::default()],
            _writer: writer,
            finished: false,
        }
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Committed version this transaction reads.
    pub fn snapshot(&self) -> VersionNumber {
        self.snapshot
    }

    /// Transaction time, stamped on every row this transaction writes.
    pub fn now(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn principal(&self) -> EntityId {
        self.context.principal()
    }

    pub fn context(&self) -> &TxContext {
        &self.context
    }

    /// Number of open sub-transactions.
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// Number of objects with staged writes across all frames.
    pub fn change_count(&self) -> usize {
        self.frames.iter().map(Frame::change_count).sum()
    }

    pub fn begin_sub(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Folds the innermost sub-transaction into its parent.
    pub fn commit_sub(&mut self) -> RepoResult<()> {
        if self.depth() == 0 {
            return Err(RepoError::fatal("commit_sub without an open sub-transaction"));
        }
        if let Some(top) = self.frames.pop() {
            if let Some(parent) = self.frames.last_mut() {
                top.merge_into(parent);
            }
        }
        Ok(())
    }

    /// Discards the innermost sub-transaction.
    pub fn rollback_sub(&mut self) -> RepoResult<()> {
        if self.depth() == 0 {
            return Err(RepoError::fatal("rollback_sub without an open sub-transaction"));
        }
        self.frames.pop();
        Ok(())
    }

    /// Runs `f` in a sub-transaction: committed when it returns `Ok`, rolled
    /// back when it returns `Err`.
    pub fn sub<T, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepoError>,
    {
        let depth = self.depth();
        self.begin_sub();
        let result = f(self);
        if self.depth() != depth + 1 {
            self.frames.truncate(depth + 1);
            return Err(RepoError::fatal("sub-transaction left unbalanced").into());
        }
        match result {
            Ok(value) => {
                self.commit_sub()?;
                Ok(value)
            }
            Err(e) => {
                self.rollback_sub()?;
                Err(e)
            }
        }
    }

    /// Publishes every staged write at the next version number.
    ///
    /// Returns the version the changes became visible at, or the snapshot
    /// when there was nothing to publish.
    pub fn commit(mut self) -> RepoResult<VersionNumber> {
        if self.depth() > 0 {
            return Err(RepoError::fatal(format!(
                "commit with {} open sub-transaction(s)",
                self.depth()
            )));
        }
        let frame = self.frames.pop().unwrap_or_default();
        self.finished = true;
        if self.mode == TxMode::ReadOnly || frame.tables.is_empty() {
            return Ok(self.snapshot);
        }

        let version = self.db.clock().pending_version();
        let changes = frame.change_count();
        let mut tables = Vec::with_capacity(frame.tables.len());
        for pending in frame.tables.into_values() {
            tables.push(pending.table_name());
            pending.publish(version);
        }
        self.db.clock().publish(version);
        debug!(version = %version, changes, tables = ?tables, "Transaction committed");
        Ok(version)
    }

    /// Discards every staged write.
    pub fn rollback(mut self) {
        self.frames.clear();
    }

    pub(crate) fn ensure_writable(&self, table: &'static str) -> RepoResult<()> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(RepoError::fatal(format!(
                "write to {table} in a read-only transaction"
            ))),
        }
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    /// Latest staged change for `id`, innermost frame first.
    pub(crate) fn pending<R: Record>(&self, id: EntityId) -> Option<&Change<R>> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get::<R>().and_then(|set| set.get(id)))
    }

    /// Every object this transaction has written, with its effective row
    /// (`None` once deleted).
    pub(crate) fn pending_rows<R: Record>(&self) -> BTreeMap<EntityId, Option<Row<R>>> {
        let mut rows = BTreeMap::new();
        for set in self.frames.iter().filter_map(Frame::get::<R>) {
            for (id, change) in &set.changes {
                rows.insert(*id, change.row().cloned());
            }
        }
        rows
    }

    pub(crate) fn change_set_mut<R: Record>(
        &mut self,
        table: &Arc<RwLock<TableState<R>>>,
    ) -> RepoResult<&mut ChangeSet<R>> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| RepoError::fatal("transaction already finished"))?;
        frame
            .tables
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(ChangeSet::new(Arc::clone(table))))
            .as_any_mut()
            .downcast_mut::<ChangeSet<R>>()
            .ok_or_else(|| RepoError::fatal(format!("change set type mismatch for {}", R::TABLE)))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && self.change_count() > 0 {
            debug!(
                snapshot = %self.snapshot,
                changes = self.change_count(),
                "Transaction rolled back"
            );
        }
        self.db.watermark().release(self.snapshot);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode)
            .field("snapshot", &self.snapshot)
            .field("depth", &self.depth())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
