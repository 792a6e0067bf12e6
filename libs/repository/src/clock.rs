//! Commit timeline and snapshot watermark.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use sched_id::EntityId;

use crate::error::{RepoError, RepoResult};
use crate::version::VersionNumber;

/// Owns the commit timeline: the last committed version, the shared id
/// sequence, and the writer lock that serialises read-write transactions.
#[derive(Debug)]
pub(crate) struct VersionClock {
    last_committed: AtomicU64,
    next_id: AtomicU64,
    loaded_ids: Mutex<HashSet<EntityId>>,
    writer: Arc<Mutex<()>>,
}

pub(crate) type WriterGuard = ArcMutexGuard<RawMutex, ()>;

impl VersionClock {
    pub(crate) fn new() -> Self {
        Self {
            last_committed: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            loaded_ids: Mutex::new(HashSet::new()),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn last_committed(&self) -> VersionNumber {
        VersionNumber::new(self.last_committed.load(Ordering::Acquire))
    }

    /// Blocks until no other read-write transaction is open.
    pub(crate) fn acquire_writer(&self) -> WriterGuard {
        self.writer.lock_arc()
    }

    /// Version the next commit publishes at. Caller holds the writer lock.
    pub(crate) fn pending_version(&self) -> VersionNumber {
        self.last_committed().next()
    }

    /// Makes `version` the newest snapshot. Caller holds the writer lock.
    pub(crate) fn publish(&self, version: VersionNumber) {
        self.last_committed.store(version.value(), Ordering::Release);
    }

    pub(crate) fn allocate_id(&self) -> EntityId {
        EntityId::new(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Claims an id that came from durable storage and keeps the sequence
    /// ahead of it.
    ///
    /// Every table draws from one id space, so an id may be loaded once
    /// across all tables.
    pub(crate) fn claim_loaded_id(&self, id: EntityId) -> RepoResult<()> {
        let next = id
            .value()
            .checked_add(1)
            .ok_or_else(|| RepoError::fatal(format!("loaded id {id} exhausts the id sequence")))?;
        if !self.loaded_ids.lock().insert(id) {
            return Err(RepoError::fatal(format!("id {id} loaded into more than one table")));
        }
        self.next_id.fetch_max(next, Ordering::AcqRel);
        Ok(())
    }
}

/// Registry of snapshots held by open transactions.
///
/// Its minimum is the lowest active version: no open reader can see a
/// version that closed at or below it, so history up to there may be pruned.
#[derive(Debug, Default)]
pub(crate) struct Watermark {
    active: Mutex<BTreeMap<VersionNumber, usize>>,
}

impl Watermark {
    /// Registers the newest committed version as a snapshot and returns it.
    ///
    /// Reading the clock under the registry lock keeps compaction from
    /// computing a floor between the read and the registration.
    pub(crate) fn register_latest(&self, clock: &VersionClock) -> VersionNumber {
        let mut active = self.active.lock();
        let snapshot = clock.last_committed();
        *active.entry(snapshot).or_insert(0) += 1;
        snapshot
    }

    pub(crate) fn release(&self, snapshot: VersionNumber) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&snapshot) {
            *count -= 1;
            if *count == 0 {
                active.remove(&snapshot);
            }
        }
    }

    /// Oldest snapshot still in use, or the newest committed version when
    /// nothing is open.
    pub(crate) fn lowest_active(&self, clock: &VersionClock) -> VersionNumber {
        let active = self.active.lock();
        let idle = clock.last_committed();
        active
            .keys()
            .next()
            .copied()
            .map_or(idle, |oldest| oldest.min(idle))
    }

    pub(crate) fn open_count(&self) -> usize {
        self.active.lock().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_tracks_oldest_snapshot() {
        let clock = VersionClock::new();
        let watermark = Watermark::default();
        clock.publish(VersionNumber::new(4));
        assert_eq!(watermark.lowest_active(&clock), VersionNumber::new(4));

        assert_eq!(watermark.register_latest(&clock), VersionNumber::new(4));
        watermark.register_latest(&clock);
        clock.publish(VersionNumber::new(7));
        watermark.register_latest(&clock);
        clock.publish(VersionNumber::new(9));
        assert_eq!(watermark.lowest_active(&clock), VersionNumber::new(4));
        assert_eq!(watermark.open_count(), 3);

        watermark.release(VersionNumber::new(4));
        assert_eq!(watermark.lowest_active(&clock), VersionNumber::new(4));
        watermark.release(VersionNumber::new(4));
        assert_eq!(watermark.lowest_active(&clock), VersionNumber::new(7));
        watermark.release(VersionNumber::new(7));
        assert_eq!(watermark.lowest_active(&clock), VersionNumber::new(9));
    }

    #[test]
    fn test_claim_loaded_id_advances_sequence() {
        let clock = VersionClock::new();
        clock.claim_loaded_id(EntityId::new(41)).unwrap();
        assert_eq!(clock.allocate_id(), EntityId::new(42));
        clock.claim_loaded_id(EntityId::new(10)).unwrap();
        assert_eq!(clock.allocate_id(), EntityId::new(43));
    }

    #[test]
    fn test_claim_loaded_id_rejects_reuse() {
        let clock = VersionClock::new();
        clock.claim_loaded_id(EntityId::new(5)).unwrap();
        assert!(clock.claim_loaded_id(EntityId::new(5)).unwrap_err().is_fatal());
    }

    #[test]
    fn test_claim_loaded_id_rejects_last_id() {
        let clock = VersionClock::new();
        let err = clock.claim_loaded_id(EntityId::new(u64::MAX)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(clock.allocate_id(), EntityId::new(1));
    }
}
