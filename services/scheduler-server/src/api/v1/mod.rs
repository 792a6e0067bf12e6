//! API v1 routes.

mod jobs;
mod members;
mod scopes;

use axum::Router;
use sched_repository::{Transaction, TxMode};
use tracing::error;

use super::error::ApiError;
use crate::error::ServerResult;
use crate::repository::Repository;
use crate::session::Session;
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/scopes", scopes::routes())
        .nest("/jobs", jobs::routes())
        .nest("/groups/{group_id}/members", members::routes())
}

/// Runs repository work off the async runtime. Read-write transactions
/// hold the writer lock until they finish.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!(error = %e, "Request task failed");
            ApiError::internal("internal_error", "request task failed")
        })?
        .map_err(ApiError::from)
}

/// `f` in one read-write transaction, committed when it succeeds.
fn write_tx<T>(
    repo: &Repository,
    session: &Session,
    f: impl FnOnce(&mut Transaction) -> ServerResult<T>,
) -> ServerResult<T> {
    let mut tx = repo.begin(session.context(), TxMode::ReadWrite);
    let value = f(&mut tx)?;
    tx.commit()?;
    Ok(value)
}

/// `f` against the last committed snapshot.
fn read_tx<T>(
    repo: &Repository,
    session: &Session,
    f: impl FnOnce(&Transaction) -> ServerResult<T>,
) -> ServerResult<T> {
    let tx = repo.begin(session.context(), TxMode::ReadOnly);
    f(&tx)
}
