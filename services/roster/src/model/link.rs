//! Member/role links.
//!
//! # Purpose
//! A link is the authorization edge between a member and a role. Links are
//! only ever created or deleted, and deleting a role deletes its links.
use super::{MemberId, Role, RoleId, SubGroup};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberRoleLink {
    pub member_id: MemberId,
    pub role_id: RoleId,
}

/// A role a member currently holds, joined with the role's sub-group.
///
/// `sub_group` is loaded regardless of its `active` flag so shared-role
/// bookkeeping sees every held edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldRole {
    pub role: Role,
    pub sub_group: Option<SubGroup>,
}
