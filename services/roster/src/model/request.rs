use super::{CategoryId, MemberId, OrganizationId, RequestId, SubGroupId};
use serde::{Deserialize, Serialize};

/// A member's open request to join a category of an organization.
///
/// Unique per `(member_id, category_id, organization_id)`. The row is deleted
/// when the request is accepted or declined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRequest {
    pub id: RequestId,
    pub member_id: MemberId,
    pub category_id: CategoryId,
    pub organization_id: OrganizationId,
    pub sub_group_id: Option<SubGroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMembershipRequest {
    pub member_id: MemberId,
    pub category_id: CategoryId,
    pub organization_id: OrganizationId,
    pub sub_group_id: Option<SubGroupId>,
}
