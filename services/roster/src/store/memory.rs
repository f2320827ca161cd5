//! In-memory implementation of the roster store.
//!
//! # Purpose
//! Implements every repository trait with `HashMap`s guarded by
//! `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: each upsert runs under the write lock of
//!   its table, so uniqueness checks and inserts are atomic.
//! - Locks are always taken in declaration order (organizations, categories,
//!   sub-groups, roles, members, links, requests) and never held across a
//!   lock of an earlier table.
//!
//! # Cascades
//! Deleting a role scans the link set; this is fine for dev-sized data.
use super::{
    Activity, CategoryStore, LinkStore, MemberStore, OrganizationStore, RequestStore, RoleStore,
    RosterStore, StoreError, StoreResult, SubGroupStore,
};
use crate::error::Entity;
use crate::model::{
    Category, CategoryId, HeldRole, Member, MemberId, MemberRoleLink, MembershipRequest,
    NewMember, NewMembershipRequest, NewOrganization, NewRole, NewSubGroup, Organization,
    OrganizationId, RequestId, Role, RoleCriteria, RoleId, RoleKind, SubGroup, SubGroupId,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// In-memory roster store.
///
/// All tables are wrapped in `Arc<RwLock<...>>` so reads proceed concurrently
/// and writes are serialized per table.
pub struct InMemoryStore {
    /// Shared id sequence; ids are unique across every table.
    next_id: AtomicI64,
    organizations: Arc<RwLock<HashMap<OrganizationId, Organization>>>,
    categories: Arc<RwLock<HashMap<CategoryId, Category>>>,
    sub_groups: Arc<RwLock<HashMap<SubGroupId, SubGroup>>>,
    roles: Arc<RwLock<HashMap<RoleId, Role>>>,
    members: Arc<RwLock<HashMap<MemberId, Member>>>,
    /// Ordered so per-member scans come out sorted by role id.
    links: Arc<RwLock<BTreeSet<MemberRoleLink>>>,
    requests: Arc<RwLock<HashMap<RequestId, MembershipRequest>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            organizations: Arc::new(RwLock::new(HashMap::new())),
            categories: Arc::new(RwLock::new(HashMap::new())),
            sub_groups: Arc::new(RwLock::new(HashMap::new())),
            roles: Arc::new(RwLock::new(HashMap::new())),
            members: Arc::new(RwLock::new(HashMap::new())),
            links: Arc::new(RwLock::new(BTreeSet::new())),
            requests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn require_organization(&self, id: OrganizationId) -> StoreResult<()> {
        if self.organizations.read().await.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(Entity::Organization))
        }
    }

    async fn require_category(&self, id: CategoryId) -> StoreResult<()> {
        if self.categories.read().await.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(Entity::Category))
        }
    }

    async fn require_member(&self, id: MemberId) -> StoreResult<()> {
        if self.members.read().await.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(Entity::Member))
        }
    }

    /// Check the parent rows of a role and that its kind matches its scope.
    async fn validate_role_scope(&self, role: &NewRole) -> StoreResult<()> {
        self.require_organization(role.organization_id).await?;
        match (role.sub_group_id, role.kind.is_group_scoped()) {
            (Some(sub_group_id), true) => {
                let sub_groups = self.sub_groups.read().await;
                match sub_groups.get(&sub_group_id) {
                    Some(group) if group.organization_id == role.organization_id => Ok(()),
                    _ => Err(StoreError::NotFound(Entity::SubGroup)),
                }
            }
            (None, false) => Ok(()),
            (Some(_), false) => Err(StoreError::Conflict(format!(
                "{} role cannot be scoped to a sub-group",
                role.kind
            ))),
            (None, true) => Err(StoreError::Conflict(format!(
                "{} role requires a sub-group",
                role.kind
            ))),
        }
    }
}

fn tag_taken(roles: &HashMap<RoleId, Role>, role: &NewRole, except: Option<RoleId>) -> bool {
    let Some(tag) = role.external_tag.as_deref() else {
        return false;
    };
    roles.values().any(|existing| {
        Some(existing.id) != except
            && existing.organization_id == role.organization_id
            && existing.external_tag.as_deref() == Some(tag)
    })
}

fn same_scope(existing: &Role, role: &NewRole) -> bool {
    existing.organization_id == role.organization_id
        && existing.sub_group_id == role.sub_group_id
        && existing.kind == role.kind
}

#[async_trait]
impl OrganizationStore for InMemoryStore {
    async fn upsert_organization(
        &self,
        organization: NewOrganization,
    ) -> StoreResult<Organization> {
        let mut organizations = self.organizations.write().await;
        if let Some(external_id) = organization.external_id.as_deref()
            && let Some(existing) = organizations
                .values_mut()
                .find(|org| org.external_id.as_deref() == Some(external_id))
        {
            existing.display_name = organization.display_name;
            return Ok(existing.clone());
        }
        let created = Organization {
            id: OrganizationId(self.next_id()),
            display_name: organization.display_name,
            external_id: organization.external_id,
            active: true,
        };
        organizations.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
        activity: Activity,
    ) -> StoreResult<Organization> {
        self.organizations
            .read()
            .await
            .get(&id)
            .filter(|org| activity.admits(org.active))
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Organization))
    }

    async fn find_organization_by_external_id(
        &self,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<Organization>> {
        Ok(self
            .organizations
            .read()
            .await
            .values()
            .find(|org| {
                org.external_id.as_deref() == Some(external_id) && activity.admits(org.active)
            })
            .cloned())
    }

    async fn set_organization_active(&self, id: OrganizationId, active: bool) -> StoreResult<()> {
        let mut organizations = self.organizations.write().await;
        let org = organizations
            .get_mut(&id)
            .ok_or(StoreError::NotFound(Entity::Organization))?;
        org.active = active;
        Ok(())
    }
}

#[async_trait]
impl CategoryStore for InMemoryStore {
    async fn upsert_category(&self, name: &str) -> StoreResult<Category> {
        let mut categories = self.categories.write().await;
        if let Some(existing) = categories.values().find(|category| category.name == name) {
            return Ok(existing.clone());
        }
        let created = Category {
            id: CategoryId(self.next_id()),
            name: name.to_string(),
        };
        categories.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_category(&self, id: CategoryId) -> StoreResult<Category> {
        self.categories
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Category))
    }

    async fn list_categories(&self) -> StoreResult<Vec<Category>> {
        let mut items: Vec<_> = self.categories.read().await.values().cloned().collect();
        items.sort_by_key(|category| category.id);
        Ok(items)
    }
}

#[async_trait]
impl SubGroupStore for InMemoryStore {
    async fn upsert_sub_group(&self, sub_group: NewSubGroup) -> StoreResult<SubGroup> {
        self.require_organization(sub_group.organization_id).await?;
        self.require_category(sub_group.category_id).await?;
        let mut sub_groups = self.sub_groups.write().await;
        if let Some(existing) = sub_groups.values_mut().find(|group| {
            group.organization_id == sub_group.organization_id
                && group.category_id == sub_group.category_id
                && group.external_id == sub_group.external_id
        }) {
            existing.display_name = sub_group.display_name;
            existing.active = true;
            return Ok(existing.clone());
        }
        let created = SubGroup {
            id: SubGroupId(self.next_id()),
            organization_id: sub_group.organization_id,
            category_id: sub_group.category_id,
            external_id: sub_group.external_id,
            display_name: sub_group.display_name,
            active: true,
        };
        sub_groups.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_sub_group(&self, id: SubGroupId, activity: Activity) -> StoreResult<SubGroup> {
        self.sub_groups
            .read()
            .await
            .get(&id)
            .filter(|group| activity.admits(group.active))
            .cloned()
            .ok_or(StoreError::NotFound(Entity::SubGroup))
    }

    async fn find_sub_group(
        &self,
        organization_id: OrganizationId,
        category_id: CategoryId,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<SubGroup>> {
        Ok(self
            .sub_groups
            .read()
            .await
            .values()
            .find(|group| {
                group.organization_id == organization_id
                    && group.category_id == category_id
                    && group.external_id == external_id
                    && activity.admits(group.active)
            })
            .cloned())
    }

    async fn list_sub_groups(
        &self,
        organization_id: OrganizationId,
        category_id: Option<CategoryId>,
        activity: Activity,
    ) -> StoreResult<Vec<SubGroup>> {
        let mut items: Vec<_> = self
            .sub_groups
            .read()
            .await
            .values()
            .filter(|group| {
                group.organization_id == organization_id
                    && category_id.is_none_or(|id| group.category_id == id)
                    && activity.admits(group.active)
            })
            .cloned()
            .collect();
        items.sort_by_key(|group| group.id);
        Ok(items)
    }

    async fn set_sub_group_active(&self, id: SubGroupId, active: bool) -> StoreResult<()> {
        let mut sub_groups = self.sub_groups.write().await;
        let group = sub_groups
            .get_mut(&id)
            .ok_or(StoreError::NotFound(Entity::SubGroup))?;
        group.active = active;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        self.validate_role_scope(&role).await?;
        let mut roles = self.roles.write().await;
        if roles.values().any(|existing| same_scope(existing, &role)) {
            return Err(StoreError::Conflict(format!(
                "{} role already exists for this scope",
                role.kind
            )));
        }
        if tag_taken(&roles, &role, None) {
            return Err(StoreError::Conflict("role tag already in use".into()));
        }
        let created = Role {
            id: RoleId(self.next_id()),
            display_name: role.display_name,
            kind: role.kind,
            organization_id: role.organization_id,
            sub_group_id: role.sub_group_id,
            external_tag: role.external_tag,
        };
        roles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn upsert_role(&self, role: NewRole) -> StoreResult<Role> {
        self.validate_role_scope(&role).await?;
        let mut roles = self.roles.write().await;
        let existing_id = roles
            .values()
            .find(|existing| same_scope(existing, &role))
            .map(|existing| existing.id);
        if tag_taken(&roles, &role, existing_id) {
            return Err(StoreError::Conflict("role tag already in use".into()));
        }
        if let Some(existing) = existing_id.and_then(|id| roles.get_mut(&id)) {
            existing.display_name = role.display_name;
            existing.external_tag = role.external_tag;
            return Ok(existing.clone());
        }
        let created = Role {
            id: RoleId(self.next_id()),
            display_name: role.display_name,
            kind: role.kind,
            organization_id: role.organization_id,
            sub_group_id: role.sub_group_id,
            external_tag: role.external_tag,
        };
        roles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Role> {
        self.roles
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Role))
    }

    async fn find_role(
        &self,
        organization_id: OrganizationId,
        sub_group_id: Option<SubGroupId>,
        kind: RoleKind,
    ) -> StoreResult<Option<Role>> {
        Ok(self
            .roles
            .read()
            .await
            .values()
            .find(|role| {
                role.organization_id == organization_id
                    && role.sub_group_id == sub_group_id
                    && role.kind == kind
            })
            .cloned())
    }

    async fn find_roles_by_tags(
        &self,
        organization_id: OrganizationId,
        tags: &[String],
    ) -> StoreResult<Vec<Role>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let mut items: Vec<_> = self
            .roles
            .read()
            .await
            .values()
            .filter(|role| {
                role.organization_id == organization_id
                    && role
                        .external_tag
                        .as_ref()
                        .is_some_and(|tag| tags.contains(tag))
            })
            .cloned()
            .collect();
        items.sort_by_key(|role| role.id);
        Ok(items)
    }

    async fn find_roles(&self, criteria: &[RoleCriteria]) -> StoreResult<Vec<Role>> {
        let mut items: Vec<_> = self
            .roles
            .read()
            .await
            .values()
            .filter(|role| criteria.iter().any(|criteria| criteria.matches(role)))
            .cloned()
            .collect();
        items.sort_by_key(|role| role.id);
        Ok(items)
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        if self.roles.write().await.remove(&id).is_none() {
            return Err(StoreError::NotFound(Entity::Role));
        }
        // Cascade: a deleted role never leaves dangling links behind.
        let mut links = self.links.write().await;
        links.retain(|link| link.role_id != id);
        metrics::gauge!("roster_links_total").set(links.len() as f64);
        Ok(())
    }
}

#[async_trait]
impl MemberStore for InMemoryStore {
    async fn upsert_member(&self, member: NewMember) -> StoreResult<Member> {
        let mut members = self.members.write().await;
        if let Some(external_id) = member.external_id.as_deref()
            && let Some(existing) = members
                .values_mut()
                .find(|existing| existing.external_id.as_deref() == Some(external_id))
        {
            existing.display_name = member.display_name;
            return Ok(existing.clone());
        }
        let created = Member {
            id: MemberId(self.next_id()),
            display_name: member.display_name,
            external_id: member.external_id,
            active: true,
        };
        members.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_member(&self, id: MemberId, activity: Activity) -> StoreResult<Member> {
        self.members
            .read()
            .await
            .get(&id)
            .filter(|member| activity.admits(member.active))
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Member))
    }

    async fn find_member_by_external_id(
        &self,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<Member>> {
        Ok(self
            .members
            .read()
            .await
            .values()
            .find(|member| {
                member.external_id.as_deref() == Some(external_id)
                    && activity.admits(member.active)
            })
            .cloned())
    }

    async fn set_member_active(&self, id: MemberId, active: bool) -> StoreResult<()> {
        let mut members = self.members.write().await;
        let member = members
            .get_mut(&id)
            .ok_or(StoreError::NotFound(Entity::Member))?;
        member.active = active;
        Ok(())
    }
}

#[async_trait]
impl LinkStore for InMemoryStore {
    async fn create_link(&self, member_id: MemberId, role_id: RoleId) -> StoreResult<bool> {
        if !self.roles.read().await.contains_key(&role_id) {
            return Err(StoreError::NotFound(Entity::Role));
        }
        self.require_member(member_id).await?;
        let mut links = self.links.write().await;
        let created = links.insert(MemberRoleLink { member_id, role_id });
        metrics::gauge!("roster_links_total").set(links.len() as f64);
        Ok(created)
    }

    async fn delete_link(&self, member_id: MemberId, role_id: RoleId) -> StoreResult<bool> {
        let mut links = self.links.write().await;
        let removed = links.remove(&MemberRoleLink { member_id, role_id });
        metrics::gauge!("roster_links_total").set(links.len() as f64);
        Ok(removed)
    }

    async fn list_member_roles(
        &self,
        member_id: MemberId,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<HeldRole>> {
        let sub_groups = self.sub_groups.read().await;
        let roles = self.roles.read().await;
        let links = self.links.read().await;
        Ok(links
            .iter()
            .filter(|link| link.member_id == member_id)
            .filter_map(|link| roles.get(&link.role_id))
            .filter(|role| role.organization_id == organization_id)
            .map(|role| HeldRole {
                role: role.clone(),
                sub_group: role
                    .sub_group_id
                    .and_then(|id| sub_groups.get(&id))
                    .cloned(),
            })
            .collect())
    }

    async fn member_holds_any_role(
        &self,
        member_id: MemberId,
        role_ids: &[RoleId],
    ) -> StoreResult<bool> {
        Ok(self
            .links
            .read()
            .await
            .iter()
            .any(|link| link.member_id == member_id && role_ids.contains(&link.role_id)))
    }
}

#[async_trait]
impl RequestStore for InMemoryStore {
    async fn create_request(
        &self,
        request: NewMembershipRequest,
    ) -> StoreResult<MembershipRequest> {
        self.require_organization(request.organization_id).await?;
        self.require_category(request.category_id).await?;
        if let Some(sub_group_id) = request.sub_group_id
            && !self.sub_groups.read().await.contains_key(&sub_group_id)
        {
            return Err(StoreError::NotFound(Entity::SubGroup));
        }
        self.require_member(request.member_id).await?;
        let mut requests = self.requests.write().await;
        if requests.values().any(|existing| {
            existing.member_id == request.member_id
                && existing.category_id == request.category_id
                && existing.organization_id == request.organization_id
        }) {
            return Err(StoreError::Conflict("membership request exists".into()));
        }
        let created = MembershipRequest {
            id: RequestId(self.next_id()),
            member_id: request.member_id,
            category_id: request.category_id,
            organization_id: request.organization_id,
            sub_group_id: request.sub_group_id,
        };
        requests.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_request(&self, id: RequestId) -> StoreResult<MembershipRequest> {
        self.requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Request))
    }

    async fn find_request(
        &self,
        member_id: MemberId,
        organization_id: OrganizationId,
        category_id: CategoryId,
    ) -> StoreResult<Option<MembershipRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .find(|request| {
                request.member_id == member_id
                    && request.organization_id == organization_id
                    && request.category_id == category_id
            })
            .cloned())
    }

    async fn delete_request(&self, id: RequestId) -> StoreResult<()> {
        self.requests
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(Entity::Request))
    }
}

#[async_trait]
impl RosterStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        // In-memory backend is always "healthy" if the process is running.
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
