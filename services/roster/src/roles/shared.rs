//! Shared-role resolver.
//!
//! # Purpose
//! A category's placeholder sub-group owns "shared" roles so a member in
//! several real sub-groups of one category carries one platform tag per role
//! kind instead of one per sub-group.
//!
//! # Key invariants
//! - Exactly one placeholder exists per `(organization, category)`;
//!   [`ensure_placeholder`] is an upsert and returns the same id every time.
//! - Only group-scoped kinds are shared. Organization roles never are.
//! - A shared role is held iff at least one real sub-group role of the same
//!   `(kind, category)` is held. [`plan`] computes the edges that break this
//!   rule; [`apply_shared_roles`] repairs them.
use crate::error::RosterResult;
use crate::model::{
    CategoryId, HeldRole, MemberId, NewSubGroup, OrganizationId, Outcome, PLACEHOLDER_EXTERNAL_ID,
    Role, RoleKind, SubGroup, TagPush,
};
use crate::store::{Activity, RosterStore};
use std::collections::HashSet;

/// Create the placeholder for `(organization, category)` if it is missing.
pub async fn ensure_placeholder(
    store: &dyn RosterStore,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> RosterResult<SubGroup> {
    let category = store.get_category(category_id).await?;
    let placeholder = store
        .upsert_sub_group(NewSubGroup::placeholder(
            organization_id,
            category_id,
            format!("{} placeholder", category.name),
        ))
        .await?;
    Ok(placeholder)
}

/// The active placeholder for `(organization, category)`, if the category is
/// enabled for the organization.
pub async fn find_placeholder(
    store: &dyn RosterStore,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> RosterResult<Option<SubGroup>> {
    Ok(store
        .find_sub_group(
            organization_id,
            category_id,
            PLACEHOLDER_EXTERNAL_ID,
            Activity::ActiveOnly,
        )
        .await?)
}

/// The role of `kind` scoped to this exact sub-group.
pub async fn group_role(
    store: &dyn RosterStore,
    sub_group: &SubGroup,
    kind: RoleKind,
) -> RosterResult<Option<Role>> {
    Ok(store
        .find_role(sub_group.organization_id, Some(sub_group.id), kind)
        .await?)
}

/// The role of `kind` on the placeholder of `sub_group`'s category.
pub async fn shared_role(
    store: &dyn RosterStore,
    sub_group: &SubGroup,
    kind: RoleKind,
) -> RosterResult<Option<Role>> {
    let Some(placeholder) =
        find_placeholder(store, sub_group.organization_id, sub_group.category_id).await?
    else {
        return Ok(None);
    };
    group_role(store, &placeholder, kind).await
}

/// A real sub-group role whose shared counterpart the member is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionTarget {
    pub sub_group: SubGroup,
    pub kind: RoleKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedRolePlan {
    /// Shared roles no real sub-group role justifies any more.
    pub demote: Vec<Role>,
    /// One entry per uncovered `(kind, category)`.
    pub promote: Vec<PromotionTarget>,
}

impl SharedRolePlan {
    pub fn is_empty(&self) -> bool {
        self.demote.is_empty() && self.promote.is_empty()
    }
}

/// Compare the member's placeholder roles with their real sub-group roles.
pub fn plan(held: &[HeldRole]) -> SharedRolePlan {
    let (on_placeholder, on_real): (Vec<_>, Vec<_>) = held
        .iter()
        .filter(|held| held.role.kind.is_group_scoped())
        .filter_map(|held| held.sub_group.as_ref().map(|group| (&held.role, group)))
        .partition(|(_, group)| group.is_placeholder());

    let real_cover: HashSet<(RoleKind, CategoryId)> = on_real
        .iter()
        .map(|(role, group)| (role.kind, group.category_id))
        .collect();
    let placeholder_cover: HashSet<(RoleKind, CategoryId)> = on_placeholder
        .iter()
        .map(|(role, group)| (role.kind, group.category_id))
        .collect();

    let demote = on_placeholder
        .iter()
        .filter(|(role, group)| !real_cover.contains(&(role.kind, group.category_id)))
        .map(|(role, _)| (*role).clone())
        .collect();

    let mut seen = HashSet::new();
    let promote = on_real
        .iter()
        .filter(|(role, group)| {
            let key = (role.kind, group.category_id);
            !placeholder_cover.contains(&key) && seen.insert(key)
        })
        .map(|(role, group)| PromotionTarget {
            sub_group: (*group).clone(),
            kind: role.kind,
        })
        .collect();

    SharedRolePlan { demote, promote }
}

/// Apply [`plan`] for `held` and record the link and tag changes in `outcome`.
pub async fn apply_shared_roles(
    store: &dyn RosterStore,
    member_id: MemberId,
    held: &[HeldRole],
    outcome: &mut Outcome,
) -> RosterResult<()> {
    let plan = plan(held);
    for role in plan.demote {
        if store.delete_link(member_id, role.id).await? {
            metrics::counter!("roster_links_deleted_total").increment(1);
            tracing::debug!(member = %member_id, role = %role.id, "shared role demoted");
            outcome.tags.remove_role(&role);
            outcome.links_removed.push(role);
        }
    }
    for target in plan.promote {
        let Some(shared) = shared_role(store, &target.sub_group, target.kind).await? else {
            continue;
        };
        if store.create_link(member_id, shared.id).await? {
            metrics::counter!("roster_links_created_total").increment(1);
            tracing::debug!(member = %member_id, role = %shared.id, "shared role promoted");
            outcome.tags.add_role(&shared);
            outcome.links_added.push(shared);
        }
    }
    Ok(())
}

/// State the platform tags every shared role in `held` and every shared role
/// of `touched`'s categories should carry, whether or not this run changed
/// the link.
///
/// `held` must already be repaired by [`apply_shared_roles`]. Used on retries:
/// an earlier attempt may have committed shared links without pushing tags.
pub async fn restate_shared_tags(
    store: &dyn RosterStore,
    held: &[HeldRole],
    touched: &[Role],
    tags: &mut TagPush,
) -> RosterResult<()> {
    let mut covered = HashSet::new();
    for held in held {
        let Some(group) = &held.sub_group else {
            continue;
        };
        if !held.role.kind.is_group_scoped() {
            continue;
        }
        if group.is_placeholder() {
            tags.add_role(&held.role);
        } else {
            covered.insert((held.role.kind, group.category_id));
        }
    }

    let mut checked = HashSet::new();
    for role in touched {
        let Some(sub_group_id) = role.sub_group_id else {
            continue;
        };
        let group = store
            .get_sub_group(sub_group_id, Activity::IncludeInactive)
            .await?;
        let key = (role.kind, group.category_id);
        if covered.contains(&key) || !checked.insert(key) {
            continue;
        }
        if let Some(shared) = shared_role(store, &group, role.kind).await? {
            tags.remove_role(&shared);
        }
    }
    Ok(())
}
