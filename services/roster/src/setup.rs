//! Organization, category and sub-group setup.
//!
//! # Purpose
//! Administrative operations that create the structure the reconciliation
//! engine works on: the organization with its owner, the placeholder and
//! shared roles of each enabled category, and real sub-groups with their roles.
//!
//! # Key invariants
//! - Every operation is an upsert and may be repeated.
//! - Deactivation is a soft delete; rows and links stay in place.
use crate::auth::{org_admins, org_owners, require_permission};
use crate::error::{RosterError, RosterResult};
use crate::model::{
    Category, CategoryId, Member, MemberId, NewMember, NewOrganization, NewRole, NewSubGroup,
    Organization, OrganizationId, Role, RoleKind, RoleTags, SubGroup, SubGroupId,
};
use crate::roles::{ensure_placeholder, find_placeholder};
use crate::store::{Activity, RosterStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSetup {
    pub display_name: String,
    pub external_id: Option<String>,
    pub owner: NewMember,
    pub owner_role_tag: Option<String>,
    /// An OrgAdmin role is only created when a tag for it is given.
    pub admin_role_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationSetupResult {
    pub organization: Organization,
    pub owner: Member,
    pub owner_role: Role,
    pub admin_role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledCategory {
    pub category: Category,
    pub placeholder: SubGroup,
    pub shared_roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroupSetup {
    pub organization_id: OrganizationId,
    pub category_id: CategoryId,
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub tags: RoleTags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubGroup {
    pub sub_group: SubGroup,
    pub roles: Vec<Role>,
}

fn kind_label(kind: RoleKind) -> &'static str {
    match kind {
        RoleKind::OrgOwner => "Owner",
        RoleKind::OrgAdmin => "Admin",
        RoleKind::GroupLead => "Lead",
        RoleKind::GroupManagement => "Management",
        RoleKind::GroupMember => "Member",
    }
}

/// Create or refresh an organization, its owner and its OrgOwner role.
///
/// Reactivates a soft-deleted organization with the same external id.
#[tracing::instrument(skip(store, setup), fields(organization = %setup.display_name))]
pub async fn setup_organization(
    store: &dyn RosterStore,
    setup: OrganizationSetup,
) -> RosterResult<OrganizationSetupResult> {
    let mut organization = store
        .upsert_organization(NewOrganization {
            display_name: setup.display_name,
            external_id: setup.external_id,
        })
        .await?;
    if !organization.active {
        store.set_organization_active(organization.id, true).await?;
        organization.active = true;
    }

    let owner = store.upsert_member(setup.owner).await?;
    if !owner.active {
        store.set_member_active(owner.id, true).await?;
    }
    let owner_role = store
        .upsert_role(NewRole {
            display_name: format!("{} {}", organization.display_name, kind_label(RoleKind::OrgOwner)),
            kind: RoleKind::OrgOwner,
            organization_id: organization.id,
            sub_group_id: None,
            external_tag: setup.owner_role_tag,
        })
        .await?;
    store.create_link(owner.id, owner_role.id).await?;

    let admin_role = match setup.admin_role_tag {
        Some(tag) => Some(
            store
                .upsert_role(NewRole {
                    display_name: format!(
                        "{} {}",
                        organization.display_name,
                        kind_label(RoleKind::OrgAdmin)
                    ),
                    kind: RoleKind::OrgAdmin,
                    organization_id: organization.id,
                    sub_group_id: None,
                    external_tag: Some(tag),
                })
                .await?,
        ),
        None => None,
    };

    tracing::info!(organization = %organization.id, owner = %owner.id, "organization set up");
    Ok(OrganizationSetupResult {
        organization,
        owner: Member {
            active: true,
            ..owner
        },
        owner_role,
        admin_role,
    })
}

/// Enable a category for an organization: ensure its placeholder and upsert
/// the shared roles that have tags.
#[tracing::instrument(skip(store, tags))]
pub async fn enable_category(
    store: &dyn RosterStore,
    caller: MemberId,
    organization_id: OrganizationId,
    category_name: &str,
    tags: &RoleTags,
) -> RosterResult<EnabledCategory> {
    require_permission(store, caller, &org_admins(organization_id)).await?;
    let name = category_name.trim();
    if name.is_empty() {
        return Err(RosterError::InvalidInput("category name is empty".into()));
    }
    store
        .get_organization(organization_id, Activity::ActiveOnly)
        .await?;

    let category = store.upsert_category(name).await?;
    let placeholder = ensure_placeholder(store, organization_id, category.id).await?;
    let mut shared_roles = Vec::new();
    for (kind, tag) in tags.entries() {
        shared_roles.push(
            store
                .upsert_role(NewRole {
                    display_name: format!("{} {}", category.name, kind_label(kind)),
                    kind,
                    organization_id,
                    sub_group_id: Some(placeholder.id),
                    external_tag: Some(tag.to_string()),
                })
                .await?,
        );
    }
    tracing::info!(
        category = %category.id,
        placeholder = %placeholder.id,
        shared_roles = shared_roles.len(),
        "category enabled"
    );
    Ok(EnabledCategory {
        category,
        placeholder,
        shared_roles,
    })
}

/// Create or reactivate a real sub-group and upsert its roles that have tags.
#[tracing::instrument(skip(store, setup), fields(external_id = %setup.external_id))]
pub async fn create_sub_group(
    store: &dyn RosterStore,
    caller: MemberId,
    setup: SubGroupSetup,
) -> RosterResult<CreatedSubGroup> {
    require_permission(store, caller, &org_admins(setup.organization_id)).await?;
    let external_id = setup.external_id.trim();
    if external_id.is_empty() {
        return Err(RosterError::InvalidInput(
            "sub-group external id is empty".into(),
        ));
    }
    if find_placeholder(store, setup.organization_id, setup.category_id)
        .await?
        .is_none()
    {
        return Err(RosterError::CategoryNotSupported);
    }

    let sub_group = store
        .upsert_sub_group(NewSubGroup {
            organization_id: setup.organization_id,
            category_id: setup.category_id,
            external_id: external_id.to_string(),
            display_name: setup.display_name,
        })
        .await?;
    let mut roles = Vec::new();
    for (kind, tag) in setup.tags.entries() {
        roles.push(
            store
                .upsert_role(NewRole {
                    display_name: format!("{} {}", sub_group.display_name, kind_label(kind)),
                    kind,
                    organization_id: sub_group.organization_id,
                    sub_group_id: Some(sub_group.id),
                    external_tag: Some(tag.to_string()),
                })
                .await?,
        );
    }
    tracing::info!(sub_group = %sub_group.id, roles = roles.len(), "sub-group created");
    Ok(CreatedSubGroup { sub_group, roles })
}

pub async fn deactivate_sub_group(
    store: &dyn RosterStore,
    caller: MemberId,
    sub_group_id: SubGroupId,
) -> RosterResult<()> {
    let sub_group = store
        .get_sub_group(sub_group_id, Activity::IncludeInactive)
        .await?;
    require_permission(store, caller, &org_admins(sub_group.organization_id)).await?;
    store.set_sub_group_active(sub_group.id, false).await?;
    tracing::info!(sub_group = %sub_group.id, "sub-group deactivated");
    Ok(())
}

/// Only the OrgOwner may deactivate an organization.
pub async fn deactivate_organization(
    store: &dyn RosterStore,
    caller: MemberId,
    organization_id: OrganizationId,
) -> RosterResult<()> {
    require_permission(store, caller, &org_owners(organization_id)).await?;
    store.set_organization_active(organization_id, false).await?;
    tracing::info!(organization = %organization_id, "organization deactivated");
    Ok(())
}

/// Soft-delete a member that left the platform. Links are kept so a returning
/// member is restored by reactivation.
pub async fn deactivate_member(store: &dyn RosterStore, member_id: MemberId) -> RosterResult<()> {
    store.set_member_active(member_id, false).await?;
    tracing::info!(member = %member_id, "member deactivated");
    Ok(())
}
