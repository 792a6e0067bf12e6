//! Privilege checks applied to repository writes.

use sched_id::EntityId;

/// Kind of write being authorised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    Create,
    Edit,
    Drop,
}

impl std::fmt::Display for Privilege {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Privilege::Create => write!(f, "create"),
            Privilege::Edit => write!(f, "edit"),
            Privilege::Drop => write!(f, "drop"),
        }
    }
}

/// A write about to become part of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub privilege: Privilege,
    pub table: &'static str,
    pub id: EntityId,
}

/// Decides whether a principal may perform an action.
///
/// Called after the row has been staged but before the enclosing
/// sub-transaction commits, so a refusal leaves nothing behind.
pub trait PrivilegeChecker: Send + Sync {
    fn check_privileges(&self, principal: EntityId, action: &Action) -> bool;
}

impl<F> PrivilegeChecker for F
where
    F: Fn(EntityId, &Action) -> bool + Send + Sync,
{
    fn check_privileges(&self, principal: EntityId, action: &Action) -> bool {
        self(principal, action)
    }
}

/// Grants everything. Used by system sessions and background workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PrivilegeChecker for AllowAll {
    fn check_privileges(&self, _principal: EntityId, _action: &Action) -> bool {
        true
    }
}
