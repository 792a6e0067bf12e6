//! Job server liveness tracking.
//!
//! A connected job server that has not polled within its session timeout is
//! put on the ping list with a deadline. Polling takes it off again; if the
//! deadline passes first the liveness worker drops its session.

pub mod worker;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sched_id::EntityId;

use crate::dispatch::LivenessTracker;

pub use worker::{LivenessWorker, LivenessWorkerConfig};

/// Scopes awaiting a poll, with the instant their session expires.
#[derive(Debug, Default)]
pub struct PingList {
    deadlines: Mutex<HashMap<EntityId, DateTime<Utc>>>,
}

impl PingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching `scope_id`. An existing deadline is kept.
    pub fn register(&self, scope_id: EntityId, deadline: DateTime<Utc>) -> bool {
        let mut deadlines = self.deadlines.lock();
        if deadlines.contains_key(&scope_id) {
            return false;
        }
        deadlines.insert(scope_id, deadline);
        true
    }

    pub fn is_registered(&self, scope_id: EntityId) -> bool {
        self.deadlines.lock().contains_key(&scope_id)
    }

    /// Removes and returns every scope whose deadline is at or before `now`.
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<EntityId> {
        let mut deadlines = self.deadlines.lock();
        let expired: Vec<_> = deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            deadlines.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.deadlines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LivenessTracker for PingList {
    fn deregister(&self, scope_id: EntityId) {
        self.deadlines.lock().remove(&scope_id);
    }
}
