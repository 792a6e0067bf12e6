//! Parse errors for identifiers and access keys.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,

    /// A prefixed id carried another type's prefix.
    #[error("expected an id prefixed '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("prefixed id has no '_' separator")]
    MissingSeparator,

    #[error("malformed ULID: {0}")]
    InvalidUlid(String),

    /// Entity ids and access keys are decimal `u64`s.
    #[error("not a decimal number: {0}")]
    InvalidNumber(String),
}

impl IdError {
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    pub fn is_prefix_error(&self) -> bool {
        matches!(self, IdError::InvalidPrefix { .. })
    }
}
