//! Connected sessions.

use std::sync::Arc;

use sched_id::{EntityId, SessionId};
use sched_repository::{AllowAll, PrivilegeChecker, TxContext, SYSTEM_PRINCIPAL};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// What kind of client opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    User,
    JobServer,
    Job,
}

/// A client connection and the identity it acts under.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    role: SessionRole,
    principal: EntityId,
    privileges: Arc<dyn PrivilegeChecker>,
}

impl Session {
    pub fn new(role: SessionRole, principal: EntityId, privileges: Arc<dyn PrivilegeChecker>) -> Self {
        Self {
            id: SessionId::new(),
            role,
            principal,
            privileges,
        }
    }

    /// A job server session; job servers act as the scope they serve.
    pub fn job_server(scope_id: EntityId) -> Self {
        Self::new(SessionRole::JobServer, scope_id, Arc::new(AllowAll))
    }

    /// A job process reconnecting to its own entity.
    pub fn job(entity_id: EntityId) -> Self {
        Self::new(SessionRole::Job, entity_id, Arc::new(AllowAll))
    }

    pub fn system() -> Self {
        Self::new(SessionRole::User, SYSTEM_PRINCIPAL, Arc::new(AllowAll))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn principal(&self) -> EntityId {
        self.principal
    }

    /// Transaction context for work done on behalf of this session.
    pub fn context(&self) -> TxContext {
        TxContext::new(self.principal, Arc::clone(&self.privileges))
    }

    /// Fails unless the session's role is one of `allowed`.
    pub fn require_role(&self, allowed: &[SessionRole]) -> ServerResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ServerError::common(crate::error::ILLEGAL_COMMAND_TYPE))
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}
