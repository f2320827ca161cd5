#![cfg(feature = "pg-tests")]

mod common;

use common::{delta, role_of, set, world};
use roster::config::PostgresConfig;
use roster::error::Entity;
use roster::model::{
    NewMember, NewMembershipRequest, NewOrganization, NewRole, RoleKind,
};
use roster::roles::{Attempt, reconcile};
use roster::store::postgres::PostgresStore;
use roster::store::{
    Activity, LinkStore, MemberStore, OrganizationStore, RequestStore, RoleStore, RosterStore,
    StoreError,
};
use serial_test::serial;
use std::sync::Arc;

async fn pg_store() -> Option<Arc<PostgresStore>> {
    let url = match std::env::var("ROSTER_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("ROSTER_POSTGRES_URL"))
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping pg-tests: set ROSTER_TEST_DATABASE_URL or DATABASE_URL");
            return None;
        }
    };
    let pg = PostgresConfig {
        url,
        max_connections: 5,
        connect_timeout_ms: 2_000,
        acquire_timeout_ms: 2_000,
    };
    let store = match PostgresStore::connect(&pg).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("skipping pg-tests: connect postgres store failed: {err}");
            return None;
        }
    };
    sqlx::query(
        "TRUNCATE membership_requests, member_roles, roles, sub_groups, members, categories, organizations RESTART IDENTITY CASCADE",
    )
    .execute(store.pool())
    .await
    .expect("reset tables");
    Some(Arc::new(store))
}

#[tokio::test]
#[serial]
async fn pg_reconcile_promotes_and_demotes_shared_roles() {
    let Some(store) = pg_store().await else {
        return;
    };
    assert!(store.is_durable());
    assert_eq!(store.backend_name(), "postgres");
    store.health_check().await.expect("health");

    let world = world(store.clone()).await;
    let ada = world.member("ada").await;

    let outcome = reconcile(
        &*store,
        ada.id,
        world.org.id,
        &delta(&["alpha-member", "beta-member"], &[]),
        Attempt::First,
    )
    .await
    .expect("join");
    assert_eq!(outcome.tags.add, set(&["chess-member"]));

    let outcome = reconcile(
        &*store,
        ada.id,
        world.org.id,
        &delta(&[], &["alpha-member", "beta-member"]),
        Attempt::First,
    )
    .await
    .expect("leave");
    assert_eq!(outcome.tags.remove, set(&["chess-member"]));
    assert!(world.held_tags(ada.id).await.is_empty());
}

#[tokio::test]
#[serial]
async fn pg_role_constraints_map_to_store_errors() {
    let Some(store) = pg_store().await else {
        return;
    };
    let world = world(store.clone()).await;
    let alpha = &world.alpha.sub_group;

    let err = store
        .create_role(NewRole {
            display_name: "duplicate".into(),
            kind: RoleKind::GroupLead,
            organization_id: world.org.id,
            sub_group_id: Some(alpha.id),
            external_tag: None,
        })
        .await
        .expect_err("second lead role");
    assert!(matches!(err, StoreError::Conflict(_)));

    let err = store
        .create_role(NewRole {
            display_name: "scoped owner".into(),
            kind: RoleKind::OrgOwner,
            organization_id: world.org.id,
            sub_group_id: Some(alpha.id),
            external_tag: None,
        })
        .await
        .expect_err("organization kind on a sub-group");
    assert!(matches!(err, StoreError::Conflict(_)));

    let other = store
        .upsert_organization(NewOrganization {
            display_name: "Other".into(),
            external_id: Some("guild-2".into()),
        })
        .await
        .expect("other org");
    let err = store
        .create_role(NewRole {
            display_name: "foreign".into(),
            kind: RoleKind::GroupMember,
            organization_id: other.id,
            sub_group_id: Some(alpha.id),
            external_tag: None,
        })
        .await
        .expect_err("sub-group of another organization");
    assert!(matches!(err, StoreError::NotFound(Entity::SubGroup)));

    let lead = role_of(&world.alpha.roles, RoleKind::GroupLead);
    world.grant(world.owner.id, lead).await;
    store.delete_role(lead.id).await.expect("delete role");
    assert!(
        !store
            .member_holds_any_role(world.owner.id, &[lead.id])
            .await
            .expect("holds")
    );
}

#[tokio::test]
#[serial]
async fn pg_requests_are_unique_and_activity_filters_apply() {
    let Some(store) = pg_store().await else {
        return;
    };
    let world = world(store.clone()).await;
    let ada = store
        .upsert_member(NewMember {
            display_name: "ada".into(),
            external_id: Some("u-ada".into()),
        })
        .await
        .expect("member");

    let request = NewMembershipRequest {
        member_id: ada.id,
        category_id: world.category.id,
        organization_id: world.org.id,
        sub_group_id: Some(world.placeholder.id),
    };
    let created = store.create_request(request.clone()).await.expect("request");
    let err = store
        .create_request(request)
        .await
        .expect_err("duplicate request");
    assert!(matches!(err, StoreError::Conflict(_)));
    store.delete_request(created.id).await.expect("delete");
    assert!(matches!(
        store.get_request(created.id).await,
        Err(StoreError::NotFound(Entity::Request))
    ));

    store
        .set_member_active(ada.id, false)
        .await
        .expect("deactivate");
    assert!(
        store
            .find_member_by_external_id("u-ada", Activity::ActiveOnly)
            .await
            .expect("lookup")
            .is_none()
    );
    let inactive = store
        .get_member(ada.id, Activity::IncludeInactive)
        .await
        .expect("inactive lookup");
    assert!(!inactive.active);

    let renamed = store
        .upsert_member(NewMember {
            display_name: "Ada L.".into(),
            external_id: Some("u-ada".into()),
        })
        .await
        .expect("upsert existing");
    assert_eq!(renamed.id, ada.id);
    assert_eq!(renamed.display_name, "Ada L.");

    let held = store
        .list_member_roles(world.owner.id, world.org.id)
        .await
        .expect("held");
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].role.kind, RoleKind::OrgOwner);
    assert!(held[0].sub_group.is_none());
}
