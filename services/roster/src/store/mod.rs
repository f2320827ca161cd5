//! Roster persistence layer.
//!
//! # Purpose
//! Typed repository traits, one per entity, exposing exactly the query and
//! mutation shapes the reconciliation engine and workflows need. `RosterStore`
//! bundles them together with backend identity and health.
//!
//! # Key invariants
//! - Reads of soft-deletable entities (organizations, sub-groups, members) take
//!   an explicit [`Activity`] so the filter is visible at every call site.
//! - Upserts are keyed by the uniqueness rules of the model and are atomic.
//! - Links are created and deleted idempotently; the returned `bool` reports
//!   whether the call changed anything.
//! - Deleting a role deletes its links.
use crate::error::Entity;
use crate::model::{
    Category, CategoryId, HeldRole, Member, MemberId, MembershipRequest, NewMember,
    NewMembershipRequest, NewOrganization, NewRole, NewSubGroup, Organization, OrganizationId,
    RequestId, Role, RoleCriteria, RoleId, RoleKind, SubGroup, SubGroupId,
};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

/// Which rows a read of a soft-deletable entity returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Activity {
    #[default]
    ActiveOnly,
    IncludeInactive,
}

impl Activity {
    pub fn admits(self, active: bool) -> bool {
        active || self == Activity::IncludeInactive
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Entity),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Create an organization, or update the display name of the one sharing its
    /// external id.
    async fn upsert_organization(&self, organization: NewOrganization)
    -> StoreResult<Organization>;
    async fn get_organization(
        &self,
        id: OrganizationId,
        activity: Activity,
    ) -> StoreResult<Organization>;
    async fn find_organization_by_external_id(
        &self,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<Organization>>;
    async fn set_organization_active(&self, id: OrganizationId, active: bool) -> StoreResult<()>;
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn upsert_category(&self, name: &str) -> StoreResult<Category>;
    async fn get_category(&self, id: CategoryId) -> StoreResult<Category>;
    async fn list_categories(&self) -> StoreResult<Vec<Category>>;
}

#[async_trait]
pub trait SubGroupStore: Send + Sync {
    /// Create a sub-group keyed by `(organization, category, external_id)`, or
    /// reactivate and rename the existing one.
    async fn upsert_sub_group(&self, sub_group: NewSubGroup) -> StoreResult<SubGroup>;
    async fn get_sub_group(&self, id: SubGroupId, activity: Activity) -> StoreResult<SubGroup>;
    async fn find_sub_group(
        &self,
        organization_id: OrganizationId,
        category_id: CategoryId,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<SubGroup>>;
    /// Sub-groups of an organization, optionally narrowed to one category.
    /// Placeholders are included.
    async fn list_sub_groups(
        &self,
        organization_id: OrganizationId,
        category_id: Option<CategoryId>,
        activity: Activity,
    ) -> StoreResult<Vec<SubGroup>>;
    async fn set_sub_group_active(&self, id: SubGroupId, active: bool) -> StoreResult<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a role. A second role for the same `(organization, sub_group, kind)`
    /// or the same organization tag is a `Conflict`.
    async fn create_role(&self, role: NewRole) -> StoreResult<Role>;
    /// Insert a role, or update name and tag of the one with the same
    /// `(organization, sub_group, kind)`.
    async fn upsert_role(&self, role: NewRole) -> StoreResult<Role>;
    async fn get_role(&self, id: RoleId) -> StoreResult<Role>;
    async fn find_role(
        &self,
        organization_id: OrganizationId,
        sub_group_id: Option<SubGroupId>,
        kind: RoleKind,
    ) -> StoreResult<Option<Role>>;
    /// Roles of one organization whose external tag is in `tags`.
    async fn find_roles_by_tags(
        &self,
        organization_id: OrganizationId,
        tags: &[String],
    ) -> StoreResult<Vec<Role>>;
    /// Roles matching any of the criteria.
    async fn find_roles(&self, criteria: &[RoleCriteria]) -> StoreResult<Vec<Role>>;
    /// Delete a role together with all of its links.
    async fn delete_role(&self, id: RoleId) -> StoreResult<()>;
}

#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Create a member, or rename the one sharing its external id.
    async fn upsert_member(&self, member: NewMember) -> StoreResult<Member>;
    async fn get_member(&self, id: MemberId, activity: Activity) -> StoreResult<Member>;
    async fn find_member_by_external_id(
        &self,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<Member>>;
    async fn set_member_active(&self, id: MemberId, active: bool) -> StoreResult<()>;
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Returns `true` when the link did not exist before.
    async fn create_link(&self, member_id: MemberId, role_id: RoleId) -> StoreResult<bool>;
    /// Returns `true` when a link was removed.
    async fn delete_link(&self, member_id: MemberId, role_id: RoleId) -> StoreResult<bool>;
    /// Roles the member holds within one organization, ordered by role id.
    async fn list_member_roles(
        &self,
        member_id: MemberId,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<HeldRole>>;
    async fn member_holds_any_role(
        &self,
        member_id: MemberId,
        role_ids: &[RoleId],
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// A second request for the same `(member, category, organization)` is a `Conflict`.
    async fn create_request(&self, request: NewMembershipRequest)
    -> StoreResult<MembershipRequest>;
    async fn get_request(&self, id: RequestId) -> StoreResult<MembershipRequest>;
    async fn find_request(
        &self,
        member_id: MemberId,
        organization_id: OrganizationId,
        category_id: CategoryId,
    ) -> StoreResult<Option<MembershipRequest>>;
    async fn delete_request(&self, id: RequestId) -> StoreResult<()>;
}

#[async_trait]
pub trait RosterStore:
    OrganizationStore
    + CategoryStore
    + SubGroupStore
    + RoleStore
    + MemberStore
    + LinkStore
    + RequestStore
    + Send
    + Sync
{
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
