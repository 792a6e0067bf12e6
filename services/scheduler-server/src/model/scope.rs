//! Scopes: job servers and the categories grouping them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sched_id::{EntityId, SessionId};
use sched_repository::{key, IndexDef, Record, RepoError, RepoResult};
use serde::{Deserialize, Serialize};

/// What a scope row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Grouping node; never connects.
    Scope,
    /// A job server agent that polls for work.
    Server,
}

/// A node in the scope tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub parent_id: Option<EntityId>,
    pub kind: ScopeKind,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_terminate: bool,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default)]
    pub is_registered: bool,
    #[serde(default)]
    pub has_altered_config: bool,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Config items set on this scope. Children inherit them.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn enabled() -> bool {
    true
}

impl Scope {
    pub fn new(name: impl Into<String>, parent_id: Option<EntityId>, kind: ScopeKind) -> Self {
        Self {
            name: name.into(),
            parent_id,
            kind,
            is_enabled: true,
            is_terminate: false,
            is_suspended: false,
            is_registered: false,
            has_altered_config: false,
            last_active: None,
            session_id: None,
            config: BTreeMap::new(),
        }
    }

    pub fn is_server(&self) -> bool {
        self.kind == ScopeKind::Server
    }

    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }
}

pub const SCOPE_BY_PARENT_NAME: IndexDef<Scope> =
    IndexDef::unique("scope_by_parent_name", |s| key![s.parent_id, s.name.as_str()]);
pub const SCOPE_BY_PARENT: IndexDef<Scope> =
    IndexDef::ordinary("scope_by_parent", |s| key![s.parent_id]);

impl Record for Scope {
    const TABLE: &'static str = "scope";
    const INDEXES: &'static [IndexDef<Self>] = &[SCOPE_BY_PARENT_NAME, SCOPE_BY_PARENT];

    fn validate(&self) -> RepoResult<()> {
        if self.name.trim().is_empty() {
            return Err(RepoError::Invalid {
                table: Self::TABLE,
                reason: "name must not be empty".into(),
            });
        }
        Ok(())
    }
}
