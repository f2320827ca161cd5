//! Permission predicate evaluator.
//!
//! # Purpose
//! Decides whether a member holds at least one role matching any of a list of
//! [`RoleCriteria`] alternatives (OR across alternatives, AND within one).
//!
//! # Key invariants
//! - Evaluation has no side effects and is never cached; every workflow
//!   re-checks at call time.
//! - "No matching role" is `false`, not an error. `require_permission` turns it
//!   into `PermissionDenied`, which renders exactly like `NotFound`.
use crate::error::{RosterError, RosterResult};
use crate::model::{MemberId, OrganizationId, RoleCriteria, RoleId, RoleKind, SubGroupId};
use crate::store::{Activity, RosterStore, StoreError};

pub async fn has_permission(
    store: &dyn RosterStore,
    member_id: MemberId,
    criteria: &[RoleCriteria],
) -> RosterResult<bool> {
    if criteria.is_empty() {
        return Ok(false);
    }
    let roles = store.find_roles(criteria).await?;
    if roles.is_empty() {
        return Ok(false);
    }
    let role_ids: Vec<RoleId> = roles.iter().map(|role| role.id).collect();
    Ok(store.member_holds_any_role(member_id, &role_ids).await?)
}

/// Fail with `PermissionDenied` unless `caller` is an active member holding a
/// role matching one of `criteria`.
pub async fn require_permission(
    store: &dyn RosterStore,
    caller: MemberId,
    criteria: &[RoleCriteria],
) -> RosterResult<()> {
    ensure_active_caller(store, caller).await?;
    if has_permission(store, caller, criteria).await? {
        Ok(())
    } else {
        Err(denied(caller))
    }
}

/// Unknown and deactivated callers hold no permission at all.
pub(crate) async fn ensure_active_caller(
    store: &dyn RosterStore,
    caller: MemberId,
) -> RosterResult<()> {
    match store.get_member(caller, Activity::ActiveOnly).await {
        Ok(_) => Ok(()),
        Err(StoreError::NotFound(_)) => Err(denied(caller)),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn denied(caller: MemberId) -> RosterError {
    metrics::counter!("roster_permission_denied_total").increment(1);
    tracing::debug!(caller = %caller, "permission denied");
    RosterError::PermissionDenied
}

pub fn org_owners(organization_id: OrganizationId) -> Vec<RoleCriteria> {
    vec![RoleCriteria::organization(organization_id, RoleKind::OrgOwner)]
}

/// OrgOwner or OrgAdmin.
pub fn org_admins(organization_id: OrganizationId) -> Vec<RoleCriteria> {
    vec![
        RoleCriteria::organization(organization_id, RoleKind::OrgOwner),
        RoleCriteria::organization(organization_id, RoleKind::OrgAdmin),
    ]
}

/// GroupLead or GroupManagement on one sub-group.
pub fn group_leads(organization_id: OrganizationId, sub_group_id: SubGroupId) -> Vec<RoleCriteria> {
    vec![
        RoleCriteria::sub_group(organization_id, sub_group_id, RoleKind::GroupLead),
        RoleCriteria::sub_group(organization_id, sub_group_id, RoleKind::GroupManagement),
    ]
}

/// Organization admins plus the leads of one sub-group.
pub fn sub_group_managers(
    organization_id: OrganizationId,
    sub_group_id: SubGroupId,
) -> Vec<RoleCriteria> {
    let mut criteria = org_admins(organization_id);
    criteria.extend(group_leads(organization_id, sub_group_id));
    criteria
}
