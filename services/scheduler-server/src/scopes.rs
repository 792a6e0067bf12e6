//! Scope registration, configuration and job server sessions.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use sched_id::{EntityId, SessionId};
use sched_repository::{key, Row, Transaction};
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult, SERVER_ALREADY_CONNECTED};
use crate::model::{Scope, ScopeKind, SCOPE_BY_PARENT};
use crate::repository::Repository;

/// Config item holding the job server's poll delay in seconds.
pub const NOP_DELAY: &str = "NOP_DELAY";

/// Session timeout when `NOP_DELAY` is absent or unusable.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of missed polls before a session times out.
const MISSED_POLLS: u64 = 3;

/// Creates a scope under `parent_id`.
pub fn create_scope(
    repo: &Repository,
    tx: &mut Transaction,
    name: &str,
    parent_id: Option<EntityId>,
    kind: ScopeKind,
) -> ServerResult<Row<Scope>> {
    if let Some(parent) = parent_id {
        repo.scopes.get(tx, parent)?;
    }
    Ok(repo.scopes.create(tx, Scope::new(name, parent_id, kind))?)
}

/// Sets config items on a scope and flags every server below it for a
/// config push.
pub fn alter_config(
    repo: &Repository,
    tx: &mut Transaction,
    scope_id: EntityId,
    items: BTreeMap<String, String>,
) -> ServerResult<()> {
    repo.scopes
        .modify(tx, scope_id, |scope| scope.config.extend(items))?;
    for id in subtree(repo, tx, scope_id)? {
        let scope = repo.scopes.get(tx, id)?;
        if scope.is_server() && !scope.has_altered_config {
            repo.scopes
                .modify(tx, id, |s| s.has_altered_config = true)?;
        }
    }
    Ok(())
}

/// Config items in effect for `scope_id`: its own items over those of its
/// ancestors, nearest scope winning.
pub fn effective_config(
    repo: &Repository,
    tx: &Transaction,
    scope_id: EntityId,
) -> ServerResult<BTreeMap<String, String>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(scope_id);
    while let Some(id) = next {
        if !seen.insert(id) {
            warn!(scope_id = %id, "Cycle in scope tree");
            break;
        }
        let scope = repo.scopes.get(tx, id)?;
        next = scope.parent_id;
        chain.push(scope);
    }

    let mut config = BTreeMap::new();
    for scope in chain.iter().rev() {
        config.extend(scope.config.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(config)
}

/// `NOP_DELAY` × 3 seconds from the effective config.
pub fn session_timeout(
    repo: &Repository,
    tx: &Transaction,
    scope_id: EntityId,
) -> ServerResult<Duration> {
    let config = effective_config(repo, tx, scope_id)?;
    let timeout = config
        .get(NOP_DELAY)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(DEFAULT_SESSION_TIMEOUT, |secs| {
            Duration::from_secs(secs.saturating_mul(MISSED_POLLS))
        });
    Ok(timeout)
}

/// Binds a job server session to its scope.
///
/// Returns the session timeout the server must poll within.
pub fn connect_scope(
    repo: &Repository,
    tx: &mut Transaction,
    scope_id: EntityId,
    session_id: SessionId,
) -> ServerResult<Duration> {
    let scope = repo.scopes.get(tx, scope_id)?;
    if !scope.is_server() {
        return Err(ServerError::common(format!(
            "Scope {} is not a job server",
            scope.name
        )));
    }
    if !scope.is_enabled {
        return Err(ServerError::common(format!(
            "Job server {} is disabled",
            scope.name
        )));
    }
    if scope.is_connected() {
        return Err(ServerError::common(SERVER_ALREADY_CONNECTED));
    }

    let now = tx.now();
    repo.scopes.modify(tx, scope_id, |s| {
        s.session_id = Some(session_id);
        s.is_registered = true;
        s.last_active = Some(now);
    })?;
    let timeout = session_timeout(repo, tx, scope_id)?;
    info!(
        scope_id = %scope_id,
        session_id = %session_id,
        timeout_secs = timeout.as_secs(),
        "Job server connected"
    );
    Ok(timeout)
}

/// Drops the session bound to a scope, if any.
pub fn disconnect_scope(repo: &Repository, tx: &mut Transaction, scope_id: EntityId) -> ServerResult<()> {
    let scope = repo.scopes.get(tx, scope_id)?;
    if !scope.is_connected() {
        return Ok(());
    }
    repo.scopes
        .modify(tx, scope_id, |s| s.session_id = None)?;
    info!(scope_id = %scope_id, "Job server disconnected");
    Ok(())
}

/// Flags a job server to shut down on its next poll.
pub fn request_shutdown(repo: &Repository, tx: &mut Transaction, scope_id: EntityId) -> ServerResult<()> {
    repo.scopes
        .modify(tx, scope_id, |s| s.is_terminate = true)?;
    Ok(())
}

pub fn set_scope_suspended(
    repo: &Repository,
    tx: &mut Transaction,
    scope_id: EntityId,
    suspended: bool,
) -> ServerResult<()> {
    repo.scopes
        .modify(tx, scope_id, |s| s.is_suspended = suspended)?;
    Ok(())
}

/// `scope_id` and every scope below it, parents before children.
fn subtree(repo: &Repository, tx: &Transaction, scope_id: EntityId) -> ServerResult<Vec<EntityId>> {
    let mut ids = vec![scope_id];
    let mut i = 0;
    while i < ids.len() {
        let children = repo
            .scopes
            .get_vector(tx, &SCOPE_BY_PARENT, &key![Some(ids[i])])?;
        ids.extend(children.into_iter().map(|c| c.id));
        i += 1;
    }
    Ok(ids)
}
