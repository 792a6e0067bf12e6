//! Secondary indexes.

use std::collections::BTreeMap;

use sched_id::EntityId;

use crate::key::Key;
use crate::version::VersionNumber;

/// Whether a key may have more than one live owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Ordinary,
    Unique,
}

/// Declaration of one derived key over a record type.
pub struct IndexDef<R> {
    pub name: &'static str,
    pub kind: IndexKind,
    pub key: fn(&R) -> Key,
}

impl<R> IndexDef<R> {
    pub const fn ordinary(name: &'static str, key: fn(&R) -> Key) -> Self {
        Self {
            name,
            kind: IndexKind::Ordinary,
            key,
        }
    }

    pub const fn unique(name: &'static str, key: fn(&R) -> Key) -> Self {
        Self {
            name,
            kind: IndexKind::Unique,
            key,
        }
    }

    pub fn key_of(&self, record: &R) -> Key {
        (self.key)(record)
    }
}

impl<R> Clone for IndexDef<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for IndexDef<R> {}

impl<R> std::fmt::Debug for IndexDef<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    id: EntityId,
    valid_from: VersionNumber,
    valid_to: VersionNumber,
}

impl IndexEntry {
    fn visible_at(&self, at: VersionNumber) -> bool {
        self.valid_from <= at && at < self.valid_to
    }
}

/// Committed, versioned state of one index.
///
/// Each key maps to its owners in insertion order. Entries are never moved:
/// retiring one closes its interval, so readers at older snapshots still see
/// the owners they saw before.
#[derive(Debug)]
pub(crate) struct Index {
    name: &'static str,
    kind: IndexKind,
    entries: BTreeMap<Key, Vec<IndexEntry>>,
}

impl Index {
    pub(crate) fn new(name: &'static str, kind: IndexKind) -> Self {
        Self {
            name,
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn kind(&self) -> IndexKind {
        self.kind
    }

    pub(crate) fn insert(
        &mut self,
        key: Key,
        id: EntityId,
        valid_from: VersionNumber,
        valid_to: VersionNumber,
    ) {
        self.entries.entry(key).or_default().push(IndexEntry {
            id,
            valid_from,
            valid_to,
        });
    }

    /// Closes the open entry of `id` under `key`.
    pub(crate) fn retire(&mut self, key: &Key, id: EntityId, at: VersionNumber) {
        if let Some(owners) = self.entries.get_mut(key) {
            if let Some(entry) = owners
                .iter_mut()
                .find(|e| e.id == id && e.valid_to.is_infinite())
            {
                entry.valid_to = at;
            }
        }
    }

    /// Owners of `key` at `at`, in insertion order.
    pub(crate) fn lookup(&self, key: &Key, at: VersionNumber) -> Vec<EntityId> {
        self.entries
            .get(key)
            .map(|owners| {
                owners
                    .iter()
                    .filter(|e| e.visible_at(at))
                    .map(|e| e.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Owners of every key starting with `prefix`, in key order.
    pub(crate) fn lookup_prefix(&self, prefix: &Key, at: VersionNumber) -> Vec<(Key, EntityId)> {
        self.entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, owners)| {
                owners
                    .iter()
                    .filter(move |e| e.visible_at(at))
                    .map(move |e| (key.clone(), e.id))
            })
            .collect()
    }

    /// The open owner of `key`, if any. Only meaningful for unique indexes.
    pub(crate) fn live_owner(&self, key: &Key) -> Option<EntityId> {
        self.entries.get(key).and_then(|owners| {
            owners
                .iter()
                .find(|e| e.valid_to.is_infinite())
                .map(|e| e.id)
        })
    }

    /// Drops entries that closed at or below `floor`. Returns how many.
    pub(crate) fn prune(&mut self, floor: VersionNumber) -> usize {
        let mut pruned = 0;
        self.entries.retain(|_, owners| {
            let before = owners.len();
            owners.retain(|e| e.valid_to > floor);
            pruned += before - owners.len();
            !owners.is_empty()
        });
        pruned
    }
}
