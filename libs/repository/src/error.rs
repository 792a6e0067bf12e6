//! Repository error types.

use sched_id::EntityId;
use thiserror::Error;

use crate::privilege::Privilege;

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors raised by tables and transactions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// Caller bug: writing under a read-only transaction, committing with
    /// open sub-transactions, registering a table twice. Never caused by
    /// bad input and never recoverable inside the transaction.
    #[error("fatal repository error: {0}")]
    Fatal(String),

    /// No visible row with this id.
    #[error("{table} {id} not found")]
    NotFound { table: &'static str, id: EntityId },

    /// No visible row owns this key in a unique index.
    #[error("no {index} entry for key {key}")]
    KeyNotFound { index: &'static str, key: String },

    /// The privilege checker refused the operation.
    #[error("principal {principal} may not {privilege} {table} {id}")]
    AccessViolation {
        principal: EntityId,
        privilege: Privilege,
        table: &'static str,
        id: EntityId,
    },

    /// The record's own validation rejected the attributes.
    #[error("invalid {table}: {reason}")]
    Invalid { table: &'static str, reason: String },

    /// A unique index already has a different live owner for this key.
    #[error("duplicate key {key} in {index}")]
    DuplicateKey { index: &'static str, key: String },
}

impl RepoError {
    pub(crate) fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true for lookups that found nothing (by id or by key).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::KeyNotFound { .. })
    }

    /// Returns true for programmer errors.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Returns true for unique-key collisions.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}
