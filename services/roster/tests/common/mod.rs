#![allow(dead_code)]

use async_trait::async_trait;
use roster::model::{
    Category, Member, MemberId, NewMember, Organization, OrganizationId, Role, RoleKind, RoleTags,
    SubGroup,
};
use roster::platform::PlatformClient;
use roster::roles::RoleTagDelta;
use roster::setup::{
    CreatedSubGroup, OrganizationSetup, SubGroupSetup, create_sub_group, enable_category,
    setup_organization,
};
use roster::store::{LinkStore, MemberStore, RosterStore};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// One organization with the "Chess" category enabled and two real sub-groups.
pub struct World {
    pub store: Arc<dyn RosterStore>,
    pub org: Organization,
    pub owner: Member,
    pub admin_role: Role,
    pub category: Category,
    pub placeholder: SubGroup,
    pub shared: Vec<Role>,
    pub alpha: CreatedSubGroup,
    pub beta: CreatedSubGroup,
}

pub fn tags(prefix: &str) -> RoleTags {
    RoleTags {
        lead: Some(format!("{prefix}-lead")),
        management: Some(format!("{prefix}-mgmt")),
        member: Some(format!("{prefix}-member")),
    }
}

pub async fn world(store: Arc<dyn RosterStore>) -> World {
    world_named(store, "guild-1").await
}

pub async fn world_named(store: Arc<dyn RosterStore>, external_id: &str) -> World {
    let setup = setup_organization(
        store.as_ref(),
        OrganizationSetup {
            display_name: format!("Guild {external_id}"),
            external_id: Some(external_id.to_string()),
            owner: NewMember {
                display_name: format!("owner of {external_id}"),
                external_id: Some(format!("owner-{external_id}")),
            },
            owner_role_tag: Some("owner".into()),
            admin_role_tag: Some("admin".into()),
        },
    )
    .await
    .expect("setup organization");
    let org = setup.organization;
    let owner = setup.owner;

    let enabled = enable_category(store.as_ref(), owner.id, org.id, "Chess", &tags("chess"))
        .await
        .expect("enable category");
    let alpha = sub_group(&store, owner.id, &org, &enabled.category, "alpha").await;
    let beta = sub_group(&store, owner.id, &org, &enabled.category, "beta").await;

    World {
        store,
        org,
        owner,
        admin_role: setup.admin_role.expect("admin role"),
        category: enabled.category,
        placeholder: enabled.placeholder,
        shared: enabled.shared_roles,
        alpha,
        beta,
    }
}

pub async fn sub_group(
    store: &Arc<dyn RosterStore>,
    caller: MemberId,
    org: &Organization,
    category: &Category,
    external_id: &str,
) -> CreatedSubGroup {
    create_sub_group(
        store.as_ref(),
        caller,
        SubGroupSetup {
            organization_id: org.id,
            category_id: category.id,
            external_id: external_id.to_string(),
            display_name: capitalize(external_id),
            tags: tags(external_id),
        },
    )
    .await
    .expect("create sub-group")
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl World {
    pub fn shared_role(&self, kind: RoleKind) -> &Role {
        role_of(&self.shared, kind)
    }

    pub async fn member(&self, name: &str) -> Member {
        self.store
            .upsert_member(NewMember {
                display_name: name.to_string(),
                external_id: Some(format!("u-{name}")),
            })
            .await
            .expect("member")
    }

    pub async fn grant(&self, member: MemberId, role: &Role) {
        self.store
            .create_link(member, role.id)
            .await
            .expect("grant role");
    }

    /// External tags of every role `member` holds in this organization.
    pub async fn held_tags(&self, member: MemberId) -> BTreeSet<String> {
        held_tags(self.store.as_ref(), member, self.org.id).await
    }
}

pub fn role_of(roles: &[Role], kind: RoleKind) -> &Role {
    roles
        .iter()
        .find(|role| role.kind == kind)
        .unwrap_or_else(|| panic!("no {kind} role"))
}

pub async fn held_tags(
    store: &dyn RosterStore,
    member: MemberId,
    org: OrganizationId,
) -> BTreeSet<String> {
    store
        .list_member_roles(member, org)
        .await
        .expect("held roles")
        .into_iter()
        .filter_map(|held| held.role.external_tag)
        .collect()
}

pub fn delta(added: &[&str], removed: &[&str]) -> RoleTagDelta {
    RoleTagDelta {
        added: added.iter().map(|tag| tag.to_string()).collect(),
        removed: removed.iter().map(|tag| tag.to_string()).collect(),
    }
}

pub fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    pub op: &'static str,
    pub organization: String,
    pub member: String,
    pub tags: Vec<String>,
}

/// Platform client that records every push.
#[derive(Default)]
pub struct RecordingPlatformClient {
    calls: Mutex<Vec<TagCall>>,
}

impl RecordingPlatformClient {
    pub fn calls(&self) -> Vec<TagCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, op: &'static str, organization: &str, member: &str, tags: &[String]) {
        self.calls.lock().expect("calls lock").push(TagCall {
            op,
            organization: organization.to_string(),
            member: member.to_string(),
            tags: tags.to_vec(),
        });
    }
}

#[async_trait]
impl PlatformClient for RecordingPlatformClient {
    async fn add_tags(
        &self,
        organization: &str,
        member: &str,
        tags: &[String],
    ) -> anyhow::Result<()> {
        self.record("add", organization, member, tags);
        Ok(())
    }

    async fn remove_tags(
        &self,
        organization: &str,
        member: &str,
        tags: &[String],
    ) -> anyhow::Result<()> {
        self.record("remove", organization, member, tags);
        Ok(())
    }
}
