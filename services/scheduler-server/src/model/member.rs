//! Group membership.

use sched_id::EntityId;
use sched_repository::{key, IndexDef, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub g_id: EntityId,
    pub u_id: EntityId,
}

pub const MEMBER_BY_GROUP: IndexDef<Member> =
    IndexDef::ordinary("member_by_group", |m| key![m.g_id]);
pub const MEMBER_BY_USER: IndexDef<Member> =
    IndexDef::ordinary("member_by_user", |m| key![m.u_id]);
pub const MEMBER_BY_GROUP_USER: IndexDef<Member> =
    IndexDef::unique("member_by_group_user", |m| key![m.g_id, m.u_id]);

impl Record for Member {
    const TABLE: &'static str = "member";
    const INDEXES: &'static [IndexDef<Self>] = &[MEMBER_BY_GROUP, MEMBER_BY_USER, MEMBER_BY_GROUP_USER];
}
