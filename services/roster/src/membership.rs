//! Membership request workflow and membership removal.
//!
//! # Purpose
//! Moves a [`MembershipRequest`] from requested to accepted or declined and
//! removes memberships on request of a sub-group manager.
//!
//! # Key invariants
//! - The request row is deleted on accept and on decline; a second call for the
//!   same id reports `RequestNotFound` and changes no links.
//! - Permission is re-checked on every call.
//! - Accepting never removes an existing membership of another sub-group. It
//!   reports `Advisory::AlreadyInSubGroup` and leaves cleanup to
//!   [`remove_prior_membership`].
use crate::auth::permission::{denied, ensure_active_caller};
use crate::auth::{group_leads, has_permission, org_admins, require_permission, sub_group_managers};
use crate::error::{Entity, RosterError, RosterResult};
use crate::model::{
    Advisory, Category, CategoryId, MemberId, MembershipRequest, NewMembershipRequest, NewRole,
    OrganizationId, Outcome, RequestId, Role, RoleId, RoleKind, SubGroup, SubGroupId,
};
use crate::roles::shared::apply_shared_roles;
use crate::roles::{find_placeholder, group_role, shared_role};
use crate::store::{Activity, RosterStore, StoreError};
use std::collections::BTreeSet;

/// Open a request for `member` to join `category` in `organization`.
///
/// Without a target the request points at the category placeholder.
#[tracing::instrument(skip(store))]
pub async fn request_access(
    store: &dyn RosterStore,
    member_id: MemberId,
    organization_id: OrganizationId,
    category_id: CategoryId,
    target: Option<SubGroupId>,
) -> RosterResult<MembershipRequest> {
    store.get_member(member_id, Activity::ActiveOnly).await?;
    store
        .get_organization(organization_id, Activity::ActiveOnly)
        .await?;
    let placeholder = find_placeholder(store, organization_id, category_id)
        .await?
        .ok_or(RosterError::CategoryNotSupported)?;
    let sub_group_id = match target {
        Some(id) => {
            let sub_group = store.get_sub_group(id, Activity::ActiveOnly).await?;
            ensure_in_category(&sub_group, organization_id, category_id)?;
            sub_group.id
        }
        None => placeholder.id,
    };
    let request = store
        .create_request(NewMembershipRequest {
            member_id,
            category_id,
            organization_id,
            sub_group_id: Some(sub_group_id),
        })
        .await
        .map_err(|err| match err {
            StoreError::Conflict(_) => RosterError::AlreadyRequested,
            other => other.into(),
        })?;
    tracing::info!(request = %request.id, "membership requested");
    Ok(request)
}

/// Accept a request into the real sub-group `target`.
///
/// The caller must be OrgOwner, OrgAdmin, or GroupLead/GroupManagement on
/// `target`.
#[tracing::instrument(skip(store))]
pub async fn accept(
    store: &dyn RosterStore,
    caller: MemberId,
    request_id: RequestId,
    target: SubGroupId,
) -> RosterResult<Outcome> {
    let request = load_request(store, request_id).await?;
    require_permission(
        store,
        caller,
        &sub_group_managers(request.organization_id, target),
    )
    .await?;

    let target = store.get_sub_group(target, Activity::ActiveOnly).await?;
    ensure_in_category(&target, request.organization_id, request.category_id)?;
    if target.is_placeholder() {
        return Err(RosterError::InvalidInput(
            "requests are accepted into a real sub-group".into(),
        ));
    }
    let member = store
        .get_member(request.member_id, Activity::ActiveOnly)
        .await?;

    let previously_held = store
        .list_member_roles(member.id, request.organization_id)
        .await?;
    let advisories = previously_held
        .iter()
        .filter(|held| held.role.kind == RoleKind::GroupMember)
        .filter_map(|held| held.sub_group.as_ref().map(|group| (&held.role, group)))
        .filter(|(_, group)| {
            !group.is_placeholder()
                && group.category_id == target.category_id
                && group.id != target.id
        })
        .map(|(role, group)| Advisory::AlreadyInSubGroup {
            sub_group_id: group.id,
            display_name: group.display_name.clone(),
            role_tag: role.external_tag.clone(),
        })
        .collect();

    let mut outcome = Outcome {
        advisories,
        ..Outcome::default()
    };
    // A replayed accept finds the links already committed but cannot know
    // whether their tags were pushed, so tags are reported either way.
    let member_role = ensure_member_role(store, &target).await?;
    outcome.tags.add_role(&member_role);
    if store.create_link(member.id, member_role.id).await? {
        metrics::counter!("roster_links_created_total").increment(1);
        outcome.links_added.push(member_role.clone());
    }
    if let Some(shared) = shared_role(store, &target, RoleKind::GroupMember).await?
        && shared.id != member_role.id
    {
        outcome.tags.add_role(&shared);
        if store.create_link(member.id, shared.id).await? {
            metrics::counter!("roster_links_created_total").increment(1);
            outcome.links_added.push(shared);
        }
    }

    store
        .delete_request(request.id)
        .await
        .map_err(request_error)?;

    outcome.held_roles = held_role_ids(store, member.id, request.organization_id).await?;
    tracing::info!(
        request = %request.id,
        member = %member.id,
        sub_group = %target.id,
        advisories = outcome.advisories.len(),
        "membership accepted"
    );
    Ok(outcome)
}

/// Decline a request. Only OrgOwner and OrgAdmin may decline.
#[tracing::instrument(skip(store))]
pub async fn decline(
    store: &dyn RosterStore,
    caller: MemberId,
    request_id: RequestId,
) -> RosterResult<Outcome> {
    let request = load_request(store, request_id).await?;
    require_permission(store, caller, &org_admins(request.organization_id)).await?;
    store
        .delete_request(request.id)
        .await
        .map_err(request_error)?;
    tracing::info!(request = %request.id, member = %request.member_id, "membership declined");
    Ok(Outcome::default())
}

/// Remove `member` from one sub-group and drop shared roles it no longer
/// qualifies for.
#[tracing::instrument(skip(store))]
pub async fn remove_prior_membership(
    store: &dyn RosterStore,
    caller: MemberId,
    member_id: MemberId,
    sub_group_id: SubGroupId,
) -> RosterResult<Outcome> {
    let sub_group = store
        .get_sub_group(sub_group_id, Activity::IncludeInactive)
        .await?;
    require_permission(
        store,
        caller,
        &sub_group_managers(sub_group.organization_id, sub_group.id),
    )
    .await?;
    if sub_group.is_placeholder() {
        return Err(RosterError::InvalidInput(
            "shared roles are not removed directly".into(),
        ));
    }

    let mut outcome = Outcome::default();
    if let Some(role) = group_role(store, &sub_group, RoleKind::GroupMember).await? {
        unlink(store, member_id, role, &mut outcome).await?;
    }
    finish_removal(store, member_id, sub_group.organization_id, outcome).await
}

/// Remove `member` from every sub-group of `category` the caller manages, or
/// only from `sub_group` when given.
///
/// OrgOwner and OrgAdmin manage every sub-group. Anyone else manages the
/// sub-groups where they are GroupLead or GroupManagement and is denied when
/// that set is empty.
#[tracing::instrument(skip(store))]
pub async fn remove_from_category(
    store: &dyn RosterStore,
    caller: MemberId,
    member_id: MemberId,
    organization_id: OrganizationId,
    category_id: CategoryId,
    sub_group: Option<SubGroupId>,
) -> RosterResult<Outcome> {
    ensure_active_caller(store, caller).await?;
    let is_admin = has_permission(store, caller, &org_admins(organization_id)).await?;

    let mut managed = BTreeSet::new();
    for group in store
        .list_sub_groups(organization_id, Some(category_id), Activity::IncludeInactive)
        .await?
    {
        if group.is_placeholder() || sub_group.is_some_and(|id| id != group.id) {
            continue;
        }
        if is_admin || has_permission(store, caller, &group_leads(organization_id, group.id)).await?
        {
            managed.insert(group.id);
        }
    }
    if managed.is_empty() {
        return Err(denied(caller));
    }

    let mut outcome = Outcome::default();
    for held in store.list_member_roles(member_id, organization_id).await? {
        let in_managed_group = held
            .sub_group
            .as_ref()
            .is_some_and(|group| managed.contains(&group.id));
        if held.role.kind == RoleKind::GroupMember && in_managed_group {
            unlink(store, member_id, held.role, &mut outcome).await?;
        }
    }
    finish_removal(store, member_id, organization_id, outcome).await
}

/// Categories enabled for the organization, i.e. those with an active placeholder.
pub async fn list_supported_categories(
    store: &dyn RosterStore,
    organization_id: OrganizationId,
) -> RosterResult<Vec<Category>> {
    let mut categories = Vec::new();
    for group in store
        .list_sub_groups(organization_id, None, Activity::ActiveOnly)
        .await?
        .into_iter()
        .filter(SubGroup::is_placeholder)
    {
        categories.push(store.get_category(group.category_id).await?);
    }
    categories.sort_by_key(|category| category.id);
    categories.dedup_by_key(|category| category.id);
    Ok(categories)
}

/// Active real sub-groups of one category.
pub async fn list_sub_groups(
    store: &dyn RosterStore,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> RosterResult<Vec<SubGroup>> {
    Ok(store
        .list_sub_groups(organization_id, Some(category_id), Activity::ActiveOnly)
        .await?
        .into_iter()
        .filter(|group| !group.is_placeholder())
        .collect())
}

async fn load_request(
    store: &dyn RosterStore,
    request_id: RequestId,
) -> RosterResult<MembershipRequest> {
    store.get_request(request_id).await.map_err(request_error)
}

fn request_error(err: StoreError) -> RosterError {
    match err {
        StoreError::NotFound(_) => RosterError::RequestNotFound,
        other => other.into(),
    }
}

fn ensure_in_category(
    sub_group: &SubGroup,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> RosterResult<()> {
    if sub_group.organization_id == organization_id && sub_group.category_id == category_id {
        Ok(())
    } else {
        Err(RosterError::NotFound(Entity::SubGroup))
    }
}

/// The GroupMember role of `sub_group`, created without a tag when missing.
async fn ensure_member_role(store: &dyn RosterStore, sub_group: &SubGroup) -> RosterResult<Role> {
    if let Some(role) = group_role(store, sub_group, RoleKind::GroupMember).await? {
        return Ok(role);
    }
    let created = store
        .create_role(NewRole {
            display_name: format!("{} Member", sub_group.display_name),
            kind: RoleKind::GroupMember,
            organization_id: sub_group.organization_id,
            sub_group_id: Some(sub_group.id),
            external_tag: None,
        })
        .await;
    match created {
        Ok(role) => Ok(role),
        // Lost a race with a concurrent creator; use its row.
        Err(StoreError::Conflict(message)) => group_role(store, sub_group, RoleKind::GroupMember)
            .await?
            .ok_or(RosterError::InvariantViolation(message)),
        Err(err) => Err(err.into()),
    }
}

async fn unlink(
    store: &dyn RosterStore,
    member_id: MemberId,
    role: Role,
    outcome: &mut Outcome,
) -> RosterResult<()> {
    if store.delete_link(member_id, role.id).await? {
        metrics::counter!("roster_links_deleted_total").increment(1);
        outcome.tags.remove_role(&role);
        outcome.links_removed.push(role);
    }
    Ok(())
}

async fn finish_removal(
    store: &dyn RosterStore,
    member_id: MemberId,
    organization_id: OrganizationId,
    mut outcome: Outcome,
) -> RosterResult<Outcome> {
    if !outcome.has_link_changes() {
        return Ok(outcome);
    }
    let held = store.list_member_roles(member_id, organization_id).await?;
    apply_shared_roles(store, member_id, &held, &mut outcome).await?;
    outcome.held_roles = held_role_ids(store, member_id, organization_id).await?;
    tracing::info!(
        member = %member_id,
        removed = outcome.links_removed.len(),
        "membership removed"
    );
    Ok(outcome)
}

async fn held_role_ids(
    store: &dyn RosterStore,
    member_id: MemberId,
    organization_id: OrganizationId,
) -> RosterResult<Vec<RoleId>> {
    Ok(store
        .list_member_roles(member_id, organization_id)
        .await?
        .into_iter()
        .map(|held| held.role.id)
        .collect())
}
