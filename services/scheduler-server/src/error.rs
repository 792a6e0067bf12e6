//! Server error types.

use sched_repository::RepoError;
use thiserror::Error;

/// Message returned for every failed job access check, so a caller cannot
/// tell which part of the check failed.
pub const INVALID_CREDENTIALS: &str = "Invalid username or password";
pub const SERVER_ALREADY_CONNECTED: &str = "Server already connected";
pub const ILLEGAL_COMMAND_TYPE: &str = "Illegal commandtype within connect command";

/// Errors surfaced by scheduler operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Repository failure.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Domain precondition failure, shown verbatim to the session.
    #[error("{0}")]
    Common(String),

    /// The scheduling pass failed.
    #[error("scheduling pass failed: {0}")]
    Scheduling(String),
}

impl ServerError {
    pub fn common(message: impl Into<String>) -> Self {
        Self::Common(message.into())
    }

    pub fn invalid_credentials() -> Self {
        Self::common(INVALID_CREDENTIALS)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Repo(e) if e.is_not_found())
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
