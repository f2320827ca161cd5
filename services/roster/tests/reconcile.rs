mod common;

use common::{delta, role_of, set, world, world_named};
use roster::model::{Role, RoleId, RoleKind};
use roster::roles::{Attempt, reconcile};
use roster::store::LinkStore;
use roster::store::memory::InMemoryStore;
use std::sync::Arc;

fn ids(roles: &[Role]) -> Vec<RoleId> {
    roles.iter().map(|role| role.id).collect()
}

#[tokio::test]
async fn added_group_tag_promotes_shared_role() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let alpha_member = role_of(&world.alpha.roles, RoleKind::GroupMember).clone();
    let shared_member = world.shared_role(RoleKind::GroupMember).clone();

    let outcome = reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&["alpha-member"], &[]),
        Attempt::First,
    )
    .await
    .expect("reconcile");

    assert_eq!(ids(&outcome.links_added), vec![alpha_member.id, shared_member.id]);
    assert!(outcome.links_removed.is_empty());
    // The platform already carries alpha-member; only the shared tag is pushed.
    assert_eq!(outcome.tags.add, set(&["chess-member"]));
    assert!(outcome.tags.remove.is_empty());
    // Held roles are ordered by id; shared roles exist before the sub-groups.
    assert_eq!(outcome.held_roles, vec![shared_member.id, alpha_member.id]);
    assert_eq!(
        world.held_tags(ada.id).await,
        set(&["alpha-member", "chess-member"])
    );
}

#[tokio::test]
async fn repeated_delta_is_a_noop() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let change = delta(&["alpha-member", "alpha-lead"], &[]);

    let first = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::First)
        .await
        .expect("first");
    assert_eq!(first.tags.add, set(&["chess-lead", "chess-member"]));
    let held = world.held_tags(ada.id).await;

    let second = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::First)
        .await
        .expect("second");
    assert!(!second.has_link_changes());
    assert!(second.tags.is_empty());
    assert!(second.held_roles.is_empty());
    assert_eq!(world.held_tags(ada.id).await, held);
}

#[tokio::test]
async fn shared_role_survives_until_last_group_is_left() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let store = world.store.as_ref();
    let shared_member = world.shared_role(RoleKind::GroupMember).clone();

    reconcile(
        store,
        ada.id,
        world.org.id,
        &delta(&["alpha-member", "beta-member"], &[]),
        Attempt::First,
    )
    .await
    .expect("join both");

    let leave_alpha = reconcile(
        store,
        ada.id,
        world.org.id,
        &delta(&[], &["alpha-member"]),
        Attempt::First,
    )
    .await
    .expect("leave alpha");
    assert_eq!(
        ids(&leave_alpha.links_removed),
        vec![role_of(&world.alpha.roles, RoleKind::GroupMember).id]
    );
    assert!(leave_alpha.tags.is_empty());
    assert!(leave_alpha.held_roles.contains(&shared_member.id));

    let leave_beta = reconcile(
        store,
        ada.id,
        world.org.id,
        &delta(&[], &["beta-member"]),
        Attempt::First,
    )
    .await
    .expect("leave beta");
    assert_eq!(
        ids(&leave_beta.links_removed),
        vec![
            role_of(&world.beta.roles, RoleKind::GroupMember).id,
            shared_member.id
        ]
    );
    assert_eq!(leave_beta.tags.remove, set(&["chess-member"]));
    assert!(leave_beta.held_roles.is_empty());
    assert!(world.held_tags(ada.id).await.is_empty());
}

#[tokio::test]
async fn shared_tag_removed_on_platform_is_restored() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let store = world.store.as_ref();
    reconcile(
        store,
        ada.id,
        world.org.id,
        &delta(&["alpha-member"], &[]),
        Attempt::First,
    )
    .await
    .expect("join alpha");

    let outcome = reconcile(
        store,
        ada.id,
        world.org.id,
        &delta(&[], &["chess-member"]),
        Attempt::First,
    )
    .await
    .expect("drop shared tag");

    assert!(!outcome.has_link_changes());
    assert_eq!(outcome.tags.add, set(&["chess-member"]));
    assert_eq!(
        world.held_tags(ada.id).await,
        set(&["alpha-member", "chess-member"])
    );
}

#[tokio::test]
async fn stray_shared_tag_is_demoted() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;

    let outcome = reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&["chess-lead"], &[]),
        Attempt::First,
    )
    .await
    .expect("reconcile");

    assert!(!outcome.has_link_changes());
    assert_eq!(outcome.tags.remove, set(&["chess-lead"]));
    assert!(world.held_tags(ada.id).await.is_empty());
}

#[tokio::test]
async fn unknown_and_organization_tags() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;

    let outcome = reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&["no-such-tag"], &["also-missing"]),
        Attempt::First,
    )
    .await
    .expect("unknown tags");
    assert!(!outcome.has_link_changes());

    let outcome = reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&["admin"], &[]),
        Attempt::First,
    )
    .await
    .expect("admin tag");
    assert_eq!(ids(&outcome.links_added), vec![world.admin_role.id]);
    assert!(outcome.tags.is_empty());
}

#[tokio::test]
async fn tags_of_other_organizations_are_ignored() {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let first = world_named(store.clone(), "guild-1").await;
    let second = world_named(store.clone(), "guild-2").await;
    let ada = first.member("ada").await;

    reconcile(
        &*store,
        ada.id,
        first.org.id,
        &delta(&["alpha-member"], &[]),
        Attempt::First,
    )
    .await
    .expect("reconcile");

    assert_eq!(
        first.held_tags(ada.id).await,
        set(&["alpha-member", "chess-member"])
    );
    assert!(second.held_tags(ada.id).await.is_empty());
}

#[tokio::test]
async fn retry_recomputes_shared_roles_after_partial_failure() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let alpha_member = role_of(&world.alpha.roles, RoleKind::GroupMember);
    let shared_member = world.shared_role(RoleKind::GroupMember);
    // A failed first attempt committed the direct link and nothing else.
    world.grant(ada.id, alpha_member).await;
    let change = delta(&["alpha-member"], &[]);

    let first = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::First)
        .await
        .expect("first");
    assert!(!first.has_link_changes());
    assert!(
        !world
            .store
            .member_holds_any_role(ada.id, &[shared_member.id])
            .await
            .expect("holds")
    );

    let retry = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::Retry)
        .await
        .expect("retry");
    assert_eq!(ids(&retry.links_added), vec![shared_member.id]);
    assert_eq!(retry.tags.add, set(&["chess-member"]));
    assert_eq!(retry.held_roles, vec![shared_member.id, alpha_member.id]);
}

#[tokio::test]
async fn attempt_numbers_map_to_retry() {
    assert_eq!(Attempt::from_number(1), Attempt::First);
    assert_eq!(Attempt::from_number(0), Attempt::First);
    assert_eq!(Attempt::from_number(3), Attempt::Retry);
}

#[tokio::test]
async fn retry_restates_shared_tag_when_links_were_already_committed() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let alpha_member = role_of(&world.alpha.roles, RoleKind::GroupMember);
    let shared_member = world.shared_role(RoleKind::GroupMember);
    // The first attempt committed both links and failed before its tags were pushed.
    world.grant(ada.id, alpha_member).await;
    world.grant(ada.id, shared_member).await;

    let retry = reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&["alpha-member"], &[]),
        Attempt::Retry,
    )
    .await
    .expect("retry");

    assert!(!retry.has_link_changes());
    assert_eq!(retry.tags.add, set(&["chess-member"]));
    assert!(retry.tags.remove.is_empty());
    assert_eq!(retry.held_roles, vec![shared_member.id, alpha_member.id]);
}

#[tokio::test]
async fn retry_restates_demoted_shared_tag() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    // The first attempt deleted the direct and shared links, then failed.
    let change = delta(&[], &["alpha-member"]);

    let retry = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::Retry)
        .await
        .expect("retry");

    assert!(!retry.has_link_changes());
    assert!(retry.tags.add.is_empty());
    assert_eq!(retry.tags.remove, set(&["chess-member"]));
}

#[tokio::test]
async fn retry_keeps_shared_tag_covered_by_another_sub_group() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    world
        .grant(ada.id, role_of(&world.beta.roles, RoleKind::GroupMember))
        .await;
    world
        .grant(ada.id, world.shared_role(RoleKind::GroupMember))
        .await;

    let retry = reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&[], &["alpha-member"]),
        Attempt::Retry,
    )
    .await
    .expect("retry");

    assert_eq!(retry.tags.add, set(&["chess-member"]));
    assert!(retry.tags.remove.is_empty());
}

#[tokio::test]
async fn repeated_mixed_delta_is_a_noop() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let alpha_member = role_of(&world.alpha.roles, RoleKind::GroupMember).clone();
    let beta_member = role_of(&world.beta.roles, RoleKind::GroupMember).clone();
    reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&["beta-member"], &[]),
        Attempt::First,
    )
    .await
    .expect("join beta");
    let change = delta(&["alpha-member"], &["beta-member"]);

    let first = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::First)
        .await
        .expect("first");
    assert_eq!(ids(&first.links_added), vec![alpha_member.id]);
    assert_eq!(ids(&first.links_removed), vec![beta_member.id]);
    assert!(first.tags.is_empty());
    let held = world.held_tags(ada.id).await;
    assert_eq!(held, set(&["alpha-member", "chess-member"]));

    let second = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::First)
        .await
        .expect("second");
    assert!(!second.has_link_changes());
    assert!(second.tags.is_empty());
    assert_eq!(world.held_tags(ada.id).await, held);
}

#[tokio::test]
async fn repeated_removal_is_a_noop() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    reconcile(
        world.store.as_ref(),
        ada.id,
        world.org.id,
        &delta(&["alpha-member"], &[]),
        Attempt::First,
    )
    .await
    .expect("join alpha");
    let change = delta(&[], &["alpha-member"]);

    let first = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::First)
        .await
        .expect("first");
    assert_eq!(first.tags.remove, set(&["chess-member"]));

    let second = reconcile(world.store.as_ref(), ada.id, world.org.id, &change, Attempt::First)
        .await
        .expect("second");
    assert!(!second.has_link_changes());
    assert!(second.tags.is_empty());
    assert!(world.held_tags(ada.id).await.is_empty());
}
