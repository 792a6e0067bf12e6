//! Versioned tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sched_id::EntityId;
use tracing::{debug, info};

use crate::chain::VersionChain;
use crate::database::{CompactionStats, Database, HistoryStore};
use crate::error::{RepoError, RepoResult};
use crate::index::{Index, IndexDef, IndexKind};
use crate::key::Key;
use crate::load::{LoadStats, LoadedRow};
use crate::privilege::{Action, Privilege};
use crate::record::{Record, Row, RowMeta};
use crate::transaction::{Change, Transaction};
use crate::version::VersionNumber;

/// Committed history of one table: version chains plus their indexes.
pub(crate) struct TableState<R: Record> {
    chains: BTreeMap<EntityId, VersionChain<R>>,
    indexes: Vec<Index>,
}

impl<R: Record> TableState<R> {
    fn new() -> Self {
        Self {
            chains: BTreeMap::new(),
            indexes: R::INDEXES
                .iter()
                .map(|def| Index::new(def.name, def.kind))
                .collect(),
        }
    }

    fn index(&self, name: &'static str) -> RepoResult<&Index> {
        self.indexes
            .iter()
            .find(|index| index.name() == name)
            .ok_or_else(|| RepoError::fatal(format!("{} has no index {name}", R::TABLE)))
    }

    fn visible(&self, id: EntityId, at: VersionNumber) -> Option<&Row<R>> {
        self.chains
            .get(&id)
            .and_then(|chain| chain.at(at))
            .map(|version| &version.row)
    }

    /// Publishes a created or updated row at `at`.
    ///
    /// Index entries whose key did not change stay as they are; changed keys
    /// retire the old entry and open a new one.
    pub(crate) fn put(&mut self, row: Row<R>, at: VersionNumber) {
        let id = row.id;
        let previous = self
            .chains
            .get(&id)
            .and_then(|chain| chain.current())
            .map(|version| version.row.data.clone());

        for (def, index) in R::INDEXES.iter().zip(self.indexes.iter_mut()) {
            let new_key = def.key_of(&row.data);
            match &previous {
                Some(old) => {
                    let old_key = def.key_of(old);
                    if old_key != new_key {
                        index.retire(&old_key, id, at);
                        index.insert(new_key, id, at, VersionNumber::INFINITY);
                    }
                }
                None => index.insert(new_key, id, at, VersionNumber::INFINITY),
            }
        }

        match self.chains.get_mut(&id) {
            Some(chain) => {
                chain.supersede(at, Some(row));
            }
            None => {
                self.chains
                    .insert(id, VersionChain::new(row, at, VersionNumber::INFINITY));
            }
        }
    }

    /// Publishes the deletion of `id` at `at`.
    pub(crate) fn remove(&mut self, id: EntityId, at: VersionNumber) {
        let Some(chain) = self.chains.get_mut(&id) else {
            return;
        };
        if let Some(old) = chain.supersede(at, None) {
            for (def, index) in R::INDEXES.iter().zip(self.indexes.iter_mut()) {
                index.retire(&def.key_of(&old.data), id, at);
            }
        }
    }

    fn load_row(&mut self, row: Row<R>, valid_to: VersionNumber) -> RepoResult<()> {
        if valid_to.is_infinite() {
            for (def, index) in R::INDEXES.iter().zip(self.indexes.iter()) {
                if def.kind != IndexKind::Unique {
                    continue;
                }
                let key = def.key_of(&row.data);
                if index.live_owner(&key).is_some() {
                    return Err(RepoError::DuplicateKey {
                        index: def.name,
                        key: key.to_string(),
                    });
                }
            }
        }
        for (def, index) in R::INDEXES.iter().zip(self.indexes.iter_mut()) {
            index.insert(def.key_of(&row.data), row.id, VersionNumber::ZERO, valid_to);
        }
        self.chains
            .insert(row.id, VersionChain::new(row, VersionNumber::ZERO, valid_to));
        Ok(())
    }

    fn compact(&mut self, floor: VersionNumber) -> CompactionStats {
        let mut stats = CompactionStats {
            table: R::TABLE,
            floor,
            ..CompactionStats::default()
        };
        self.chains.retain(|_, chain| {
            stats.versions_pruned += chain.prune(floor);
            let keep = !chain.is_empty();
            if !keep {
                stats.objects_dropped += 1;
            }
            keep
        });
        for index in &mut self.indexes {
            stats.index_entries_pruned += index.prune(floor);
        }
        stats
    }
}

impl<R: Record> HistoryStore for RwLock<TableState<R>> {
    fn table_name(&self) -> &'static str {
        R::TABLE
    }

    fn compact(&self, floor: VersionNumber) -> CompactionStats {
        self.write().compact(floor)
    }
}

/// Handle to one table of a [`Database`].
///
/// Every read goes through a [`Transaction`] and sees the transaction's
/// snapshot overlaid with its own staged writes. Every write is staged in the
/// transaction and only becomes visible to others when it commits.
#[derive(Clone)]
pub struct Table<R: Record> {
    db: Database,
    state: Arc<RwLock<TableState<R>>>,
}

impl<R: Record> Table<R> {
    pub(crate) fn new(db: Database) -> Self {
        Self {
            db,
            state: Arc::new(RwLock::new(TableState::new())),
        }
    }

    pub(crate) fn history_store(&self) -> Arc<dyn HistoryStore> {
        self.state.clone()
    }

    pub fn name(&self) -> &'static str {
        R::TABLE
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Creates a new object with a fresh id.
    ///
    /// Runs in its own sub-transaction: a unique-key collision or a refused
    /// create privilege leaves nothing behind.
    pub fn create(&self, tx: &mut Transaction, data: R) -> RepoResult<Row<R>> {
        tx.ensure_writable(R::TABLE)?;
        data.validate()?;
        let row = Row {
            id: tx.database().clock().allocate_id(),
            meta: RowMeta::created(tx.principal(), tx.now()),
            data,
        };
        tx.sub(|tx| {
            self.check_unique(tx, &row)?;
            self.stage(tx, row.id, Change::Created(row.clone()))?;
            self.authorize(tx, Privilege::Create, row.id)?;
            debug!(table = R::TABLE, id = %row.id, "Created");
            Ok(row)
        })
    }

    /// Replaces the attributes of an existing object.
    pub fn update(&self, tx: &mut Transaction, id: EntityId, data: R) -> RepoResult<Row<R>> {
        tx.ensure_writable(R::TABLE)?;
        data.validate()?;
        let current = self.get(tx, id)?;
        let row = Row {
            id,
            meta: current.meta.changed(tx.principal(), tx.now()),
            data,
        };
        tx.sub(|tx| {
            self.authorize(tx, Privilege::Edit, id)?;
            self.check_unique(tx, &row)?;
            self.stage(tx, id, Change::Updated(row.clone()))?;
            Ok(row)
        })
    }

    /// Reads, edits and writes back one object.
    pub fn modify(
        &self,
        tx: &mut Transaction,
        id: EntityId,
        edit: impl FnOnce(&mut R),
    ) -> RepoResult<Row<R>> {
        let mut data = self.get(tx, id)?.data;
        edit(&mut data);
        self.update(tx, id, data)
    }

    /// Deletes an object. Older snapshots keep seeing it.
    pub fn delete(&self, tx: &mut Transaction, id: EntityId) -> RepoResult<()> {
        tx.ensure_writable(R::TABLE)?;
        self.get(tx, id)?;
        self.authorize(tx, Privilege::Drop, id)?;
        self.stage(tx, id, Change::Deleted)?;
        debug!(table = R::TABLE, id = %id, "Deleted");
        Ok(())
    }

    fn stage(&self, tx: &mut Transaction, id: EntityId, change: Change<R>) -> RepoResult<()> {
        tx.change_set_mut(&self.state)?.record(id, change);
        Ok(())
    }

    fn authorize(&self, tx: &Transaction, privilege: Privilege, id: EntityId) -> RepoResult<()> {
        let action = Action {
            privilege,
            table: R::TABLE,
            id,
        };
        if tx
            .context()
            .privileges()
            .check_privileges(tx.principal(), &action)
        {
            Ok(())
        } else {
            Err(RepoError::AccessViolation {
                principal: tx.principal(),
                privilege,
                table: R::TABLE,
                id,
            })
        }
    }

    fn check_unique(&self, tx: &Transaction, row: &Row<R>) -> RepoResult<()> {
        for def in R::INDEXES.iter().filter(|def| def.kind == IndexKind::Unique) {
            let key = def.key_of(&row.data);
            let owners = self.collect(tx, def, &key, false)?;
            if owners.iter().any(|owner| owner.id != row.id) {
                return Err(RepoError::DuplicateKey {
                    index: def.name,
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// The object with this id as the transaction sees it.
    pub fn get(&self, tx: &Transaction, id: EntityId) -> RepoResult<Row<R>> {
        self.try_get(tx, id).ok_or(RepoError::NotFound {
            table: R::TABLE,
            id,
        })
    }

    /// Like [`get`](Self::get), with absence as `None`.
    pub fn try_get(&self, tx: &Transaction, id: EntityId) -> Option<Row<R>> {
        match tx.pending::<R>(id) {
            Some(change) => change.row().cloned(),
            None => self.state.read().visible(id, tx.snapshot()).cloned(),
        }
    }

    /// The committed object as of `version`, ignoring staged writes.
    ///
    /// Versions newer than the transaction's snapshot read at the snapshot.
    pub fn get_at(
        &self,
        tx: &Transaction,
        id: EntityId,
        version: VersionNumber,
    ) -> RepoResult<Row<R>> {
        let at = version.min(tx.snapshot());
        self.state
            .read()
            .visible(id, at)
            .cloned()
            .ok_or(RepoError::NotFound {
                table: R::TABLE,
                id,
            })
    }

    /// The sole owner of `key` in a unique index.
    pub fn get_unique(&self, tx: &Transaction, index: &IndexDef<R>, key: &Key) -> RepoResult<Row<R>> {
        self.collect(tx, index, key, false)?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::KeyNotFound {
                index: index.name,
                key: key.to_string(),
            })
    }

    /// The committed owner of `key` as of `version`, ignoring staged writes.
    pub fn get_unique_at(
        &self,
        tx: &Transaction,
        index: &IndexDef<R>,
        key: &Key,
        version: VersionNumber,
    ) -> RepoResult<Row<R>> {
        let at = version.min(tx.snapshot());
        let state = self.state.read();
        state
            .index(index.name)?
            .lookup(key, at)
            .into_iter()
            .find_map(|id| state.visible(id, at).cloned())
            .ok_or_else(|| RepoError::KeyNotFound {
                index: index.name,
                key: key.to_string(),
            })
    }

    /// Every object whose `index` key equals `key`.
    ///
    /// Committed owners come first in index insertion order, then objects
    /// this transaction staged, by id.
    pub fn get_vector(&self, tx: &Transaction, index: &IndexDef<R>, key: &Key) -> RepoResult<Vec<Row<R>>> {
        self.collect(tx, index, key, false)
    }

    /// Like [`get_vector`](Self::get_vector), keeping only rows the filter
    /// accepts. The filter's error aborts the scan.
    pub fn get_vector_filtered<F, E>(
        &self,
        tx: &Transaction,
        index: &IndexDef<R>,
        key: &Key,
        mut filter: F,
    ) -> Result<Vec<Row<R>>, E>
    where
        F: FnMut(&Row<R>) -> Result<bool, E>,
        E: From<RepoError>,
    {
        let mut kept = Vec::new();
        for row in self.collect(tx, index, key, false)? {
            if filter(&row)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    /// Every object whose `index` key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, tx: &Transaction, index: &IndexDef<R>, prefix: &Key) -> RepoResult<Vec<Row<R>>> {
        self.collect(tx, index, prefix, true)
    }

    /// Every visible object, by id.
    pub fn scan(&self, tx: &Transaction) -> Vec<Row<R>> {
        let pending = tx.pending_rows::<R>();
        let snapshot = tx.snapshot();
        let mut rows: BTreeMap<EntityId, Row<R>> = {
            let state = self.state.read();
            state
                .chains
                .iter()
                .filter(|(id, _)| !pending.contains_key(id))
                .filter_map(|(id, chain)| chain.at(snapshot).map(|v| (*id, v.row.clone())))
                .collect()
        };
        rows.extend(
            pending
                .into_iter()
                .filter_map(|(id, row)| row.map(|row| (id, row))),
        );
        rows.into_values().collect()
    }

    fn collect(
        &self,
        tx: &Transaction,
        index: &IndexDef<R>,
        key: &Key,
        prefix: bool,
    ) -> RepoResult<Vec<Row<R>>> {
        let pending = tx.pending_rows::<R>();
        let snapshot = tx.snapshot();

        let mut found: Vec<(Key, Row<R>)> = {
            let state = self.state.read();
            let committed = state.index(index.name)?;
            let owners = if prefix {
                committed.lookup_prefix(key, snapshot)
            } else {
                committed
                    .lookup(key, snapshot)
                    .into_iter()
                    .map(|id| (key.clone(), id))
                    .collect()
            };
            owners
                .into_iter()
                .filter(|(_, id)| !pending.contains_key(id))
                .filter_map(|(k, id)| state.visible(id, snapshot).map(|row| (k, row.clone())))
                .collect()
        };

        for row in pending.into_values().flatten() {
            let row_key = index.key_of(&row.data);
            let matches = if prefix {
                row_key.starts_with(key)
            } else {
                &row_key == key
            };
            if matches {
                found.push((row_key, row));
            }
        }
        if prefix {
            found.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Ok(found.into_iter().map(|(_, row)| row).collect())
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Bulk-loads rows from durable storage, bypassing transactions.
    ///
    /// Rows that closed below the lowest active version are skipped. Loaded
    /// rows are valid from version zero.
    pub fn load<I>(&self, rows: I) -> RepoResult<LoadStats>
    where
        I: IntoIterator<Item = LoadedRow<R>>,
    {
        let floor = self.db.lowest_active_version();
        let mut stats = LoadStats {
            table: R::TABLE,
            read: 0,
            loaded: 0,
        };
        let mut state = self.state.write();
        for loaded in rows {
            stats.read += 1;
            let valid_to = loaded.valid_to.unwrap_or(VersionNumber::INFINITY);
            if valid_to < floor || valid_to == VersionNumber::ZERO {
                continue;
            }
            if state.chains.contains_key(&loaded.id) {
                return Err(RepoError::fatal(format!(
                    "{} {} loaded twice",
                    R::TABLE,
                    loaded.id
                )));
            }
            loaded.data.validate()?;
            self.db.clock().claim_loaded_id(loaded.id)?;
            state.load_row(
                Row {
                    id: loaded.id,
                    meta: loaded.meta,
                    data: loaded.data,
                },
                valid_to,
            )?;
            stats.loaded += 1;
        }
        info!(
            table = R::TABLE,
            read = stats.read,
            loaded = stats.loaded,
            "Read {}, Loaded {} rows for {}",
            stats.read,
            stats.loaded,
            R::TABLE
        );
        Ok(stats)
    }

    /// Prunes history no open transaction can see.
    pub fn compact(&self) -> CompactionStats {
        let floor = self.db.lowest_active_version();
        self.state.write().compact(floor)
    }

    /// The stored version chain of `id`, if any history remains.
    pub fn history(&self, id: EntityId) -> Option<VersionChain<R>> {
        self.state.read().chains.get(&id).cloned()
    }

    /// Number of objects with any stored history.
    pub fn stored_objects(&self) -> usize {
        self.state.read().chains.len()
    }
}

impl<R: Record> std::fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &R::TABLE)
            .field("stored_objects", &self.stored_objects())
            .finish()
    }
}
