//! Bulk-load input from durable storage.

use sched_id::EntityId;
use serde::{Deserialize, Serialize};

use crate::record::RowMeta;
use crate::version::VersionNumber;

/// One durable row as read at startup.
///
/// `valid_to` is absent for live rows and set for rows durably marked as
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedRow<R> {
    pub id: EntityId,
    pub meta: RowMeta,
    pub data: R,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<VersionNumber>,
}

/// Counts reported after loading one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub table: &'static str,
    pub read: usize,
    pub loaded: usize,
}
