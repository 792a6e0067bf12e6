//! Record types stored in tables.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use sched_id::EntityId;
use serde::{Deserialize, Serialize};

use crate::error::RepoResult;
use crate::index::IndexDef;

/// A type stored in a [`Table`](crate::Table).
///
/// The index list is the complete set of derived keys the table maintains
/// for this type. The engine applies it uniformly on every create, update
/// and delete, so an attribute is indexed exactly when it appears here.
pub trait Record: Clone + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Table name used in errors and logs.
    const TABLE: &'static str;

    /// Secondary indexes over this record type.
    const INDEXES: &'static [IndexDef<Self>];

    /// Rejects attribute combinations the table never stores.
    fn validate(&self) -> RepoResult<()> {
        Ok(())
    }
}

/// Audit columns stamped from the writing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMeta {
    pub creator: EntityId,
    pub created_at: DateTime<Utc>,
    pub changer: EntityId,
    pub changed_at: DateTime<Utc>,
}

impl RowMeta {
    pub(crate) fn created(principal: EntityId, at: DateTime<Utc>) -> Self {
        Self {
            creator: principal,
            created_at: at,
            changer: principal,
            changed_at: at,
        }
    }

    pub(crate) fn changed(&self, principal: EntityId, at: DateTime<Utc>) -> Self {
        Self {
            changer: principal,
            changed_at: at,
            ..self.clone()
        }
    }
}

/// One version of a stored object as seen by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<R> {
    pub id: EntityId,
    pub meta: RowMeta,
    pub data: R,
}

impl<R> Deref for Row<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.data
    }
}
