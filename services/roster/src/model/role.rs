//! Role records, role kinds, and role filters.
//!
//! # Purpose
//! A role grants one authorization level either on the whole organization
//! (`sub_group_id == None`) or on one sub-group. Its optional external tag is
//! the platform-side identifier that mirrors the grant onto a member.
//!
//! # Key invariants
//! - At most one role exists per `(organization_id, sub_group_id, kind)`. The
//!   reconciliation lookups depend on it, so the store enforces it.
//! - Organization-level kinds never carry a sub-group, and group kinds always do.
use super::{OrganizationId, RoleId, SubGroupId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleKind {
    OrgOwner,
    OrgAdmin,
    GroupLead,
    GroupManagement,
    GroupMember,
}

impl RoleKind {
    /// Kinds that are scoped to a sub-group and may be shared through a placeholder.
    pub const GROUP_KINDS: [RoleKind; 3] = [
        RoleKind::GroupLead,
        RoleKind::GroupManagement,
        RoleKind::GroupMember,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::OrgOwner => "OrgOwner",
            RoleKind::OrgAdmin => "OrgAdmin",
            RoleKind::GroupLead => "GroupLead",
            RoleKind::GroupManagement => "GroupManagement",
            RoleKind::GroupMember => "GroupMember",
        }
    }

    pub fn is_group_scoped(self) -> bool {
        Self::GROUP_KINDS.contains(&self)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "OrgOwner" => Ok(RoleKind::OrgOwner),
            "OrgAdmin" => Ok(RoleKind::OrgAdmin),
            "GroupLead" => Ok(RoleKind::GroupLead),
            "GroupManagement" => Ok(RoleKind::GroupManagement),
            "GroupMember" => Ok(RoleKind::GroupMember),
            other => Err(format!("unknown role kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub display_name: String,
    pub kind: RoleKind,
    pub organization_id: OrganizationId,
    pub sub_group_id: Option<SubGroupId>,
    pub external_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub display_name: String,
    pub kind: RoleKind,
    pub organization_id: OrganizationId,
    pub sub_group_id: Option<SubGroupId>,
    pub external_tag: Option<String>,
}

/// Conjunctive role filter: every populated field must match.
///
/// Permission checks pass a slice of these and treat the slice as a logical OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCriteria {
    pub organization_id: OrganizationId,
    pub sub_group_id: Option<SubGroupId>,
    pub kind: Option<RoleKind>,
}

impl RoleCriteria {
    pub fn organization(organization_id: OrganizationId, kind: RoleKind) -> Self {
        Self {
            organization_id,
            sub_group_id: None,
            kind: Some(kind),
        }
    }

    pub fn sub_group(
        organization_id: OrganizationId,
        sub_group_id: SubGroupId,
        kind: RoleKind,
    ) -> Self {
        Self {
            organization_id,
            sub_group_id: Some(sub_group_id),
            kind: Some(kind),
        }
    }

    pub fn matches(&self, role: &Role) -> bool {
        role.organization_id == self.organization_id
            && self
                .sub_group_id
                .is_none_or(|id| role.sub_group_id == Some(id))
            && self.kind.is_none_or(|kind| role.kind == kind)
    }
}

/// Optional external tags for the three group-scoped role kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTags {
    pub lead: Option<String>,
    pub management: Option<String>,
    pub member: Option<String>,
}

impl RoleTags {
    /// Kinds that have a tag, paired with that tag.
    pub fn entries(&self) -> impl Iterator<Item = (RoleKind, &str)> {
        [
            (RoleKind::GroupLead, self.lead.as_deref()),
            (RoleKind::GroupManagement, self.management.as_deref()),
            (RoleKind::GroupMember, self.member.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, tag)| tag.map(|tag| (kind, tag)))
    }
}
