//! Roster data model.
//!
//! # Purpose
//! Re-exports the organization/sub-group/role/member records, the link and
//! request rows, and the result values returned by the workflows.
use serde::{Deserialize, Serialize};
use std::fmt;

mod category;
mod link;
mod member;
mod organization;
mod outcome;
mod request;
mod role;
mod sub_group;

pub use category::Category;
pub use link::{HeldRole, MemberRoleLink};
pub use member::{Member, NewMember};
pub use organization::{NewOrganization, Organization};
pub use outcome::{Advisory, Outcome, TagPush};
pub use request::{MembershipRequest, NewMembershipRequest};
pub use role::{NewRole, Role, RoleCriteria, RoleKind, RoleTags};
pub use sub_group::{NewSubGroup, PLACEHOLDER_EXTERNAL_ID, SubGroup};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

entity_id!(
    /// Store-assigned organization identifier.
    OrganizationId
);
entity_id!(
    /// Store-assigned category identifier.
    CategoryId
);
entity_id!(
    /// Store-assigned sub-group identifier.
    SubGroupId
);
entity_id!(
    /// Store-assigned role identifier.
    RoleId
);
entity_id!(
    /// Store-assigned member identifier.
    MemberId
);
entity_id!(
    /// Store-assigned membership request identifier.
    RequestId
);
