//! The repository root: table registry, commit clock and watermark.

use std::sync::Arc;

use parking_lot::Mutex;
use sched_id::EntityId;
use tracing::{debug, info};

use crate::clock::{VersionClock, Watermark};
use crate::error::{RepoError, RepoResult};
use crate::record::Record;
use crate::table::Table;
use crate::transaction::{Transaction, TxContext, TxMode};
use crate::version::VersionNumber;

/// Per-table result of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub table: &'static str,
    pub floor: VersionNumber,
    pub versions_pruned: usize,
    pub index_entries_pruned: usize,
    pub objects_dropped: usize,
}

impl CompactionStats {
    pub fn is_empty(&self) -> bool {
        self.versions_pruned == 0 && self.index_entries_pruned == 0
    }
}

/// Type-erased table history, for work that spans every table.
pub(crate) trait HistoryStore: Send + Sync {
    fn table_name(&self) -> &'static str;
    fn compact(&self, floor: VersionNumber) -> CompactionStats;
}

struct DatabaseInner {
    clock: VersionClock,
    watermark: Watermark,
    tables: Mutex<Vec<Arc<dyn HistoryStore>>>,
}

/// Shared handle to an in-memory versioned repository.
///
/// Cloning is cheap; every clone refers to the same tables.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                clock: VersionClock::new(),
                watermark: Watermark::default(),
                tables: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers the table for `R`. Each record type has one table.
    pub fn table<R: Record>(&self) -> RepoResult<Table<R>> {
        let mut tables = self.inner.tables.lock();
        if tables.iter().any(|t| t.table_name() == R::TABLE) {
            return Err(RepoError::fatal(format!(
                "table {} already registered",
                R::TABLE
            )));
        }
        let table = Table::new(self.clone());
        tables.push(table.history_store());
        debug!(table = R::TABLE, indexes = R::INDEXES.len(), "Registered table");
        Ok(table)
    }

    /// Opens a transaction.
    ///
    /// A read-write transaction waits until no other read-write transaction
    /// is open.
    pub fn begin(&self, context: TxContext, mode: TxMode) -> Transaction {
        Transaction::begin(self.clone(), context, mode)
    }

    /// Newest committed version.
    pub fn last_committed(&self) -> VersionNumber {
        self.inner.clock.last_committed()
    }

    /// Oldest snapshot any open transaction reads, or the newest committed
    /// version when none is open.
    pub fn lowest_active_version(&self) -> VersionNumber {
        self.inner.watermark.lowest_active(&self.inner.clock)
    }

    /// Number of transactions currently open.
    pub fn open_transactions(&self) -> usize {
        self.inner.watermark.open_count()
    }

    /// Takes the next id from the sequence shared by all tables.
    pub fn allocate_id(&self) -> EntityId {
        self.inner.clock.allocate_id()
    }

    /// Prunes history below the lowest active version in every table.
    pub fn compact_history(&self) -> Vec<CompactionStats> {
        let floor = self.lowest_active_version();
        let tables: Vec<_> = self.inner.tables.lock().clone();
        let stats: Vec<_> = tables.iter().map(|t| t.compact(floor)).collect();
        let versions: usize = stats.iter().map(|s| s.versions_pruned).sum();
        let entries: usize = stats.iter().map(|s| s.index_entries_pruned).sum();
        if versions > 0 || entries > 0 {
            info!(
                floor = %floor,
                versions_pruned = versions,
                index_entries_pruned = entries,
                "Compacted history"
            );
        }
        stats
    }

    pub(crate) fn clock(&self) -> &VersionClock {
        &self.inner.clock
    }

    pub(crate) fn watermark(&self) -> &Watermark {
        &self.inner.watermark
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("last_committed", &self.last_committed())
            .field("open_transactions", &self.open_transactions())
            .finish_non_exhaustive()
    }
}
