//! Job-side reconnection checks.

use sched_id::{AccessKey, EntityId};
use sched_repository::Transaction;
use tracing::debug;

use crate::error::{ServerError, ServerResult};
use crate::repository::Repository;

/// Checks a job process's claim to entity `id` and returns the entity id it
/// may act for.
///
/// `id` may name the entity itself or a kill job for it; kill jobs carry no
/// token of their own and are checked against their target entity. Every
/// failure reports the same credentials error.
pub fn validate_job_access(
    repo: &Repository,
    tx: &Transaction,
    id: EntityId,
    token: &str,
    admin_access: bool,
) -> ServerResult<EntityId> {
    let entity = match repo.entities.try_get(tx, id) {
        Some(entity) => entity,
        None => {
            let kill = repo.kill_jobs.try_get(tx, id).ok_or_else(|| {
                debug!(job_id = %id, "Access denied: unknown id");
                ServerError::invalid_credentials()
            })?;
            repo.entities.try_get(tx, kill.sme_id).ok_or_else(|| {
                debug!(job_id = %id, sme_id = %kill.sme_id, "Access denied: kill target gone");
                ServerError::invalid_credentials()
            })?
        }
    };

    let presented = AccessKey::parse(token).map_err(|_| {
        debug!(job_id = %id, "Access denied: malformed token");
        ServerError::invalid_credentials()
    })?;
    if presented != entity.access_key {
        debug!(job_id = %id, "Access denied: token mismatch");
        return Err(ServerError::invalid_credentials());
    }
    if entity.state.is_terminal() && !admin_access {
        debug!(job_id = %id, state = %entity.state, "Access denied: job already terminated");
        return Err(ServerError::invalid_credentials());
    }
    Ok(entity.id)
}
