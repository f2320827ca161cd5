mod common;

use common::{RecordingPlatformClient, TagCall, World, set, world};
use futures::FutureExt;
use roster::app::AppState;
use roster::dispatch::registry::{Delivery, EventRegistry, HandlerFuture};
use roster::dispatch::{DispatchConfig, Dispatcher, Event, EventKind, routing_key};
use roster::error::RosterError;
use roster::model::{MemberId, NewMembershipRequest, Outcome, RequestId, SubGroupId};
use roster::store::memory::InMemoryStore;
use roster::store::{RequestStore, RosterStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn config() -> DispatchConfig {
    DispatchConfig {
        workers: 4,
        queue_capacity: 16,
        max_attempts: 3,
        retry_backoff: Duration::from_millis(1),
    }
}

fn start(world: &World, platform: &Arc<RecordingPlatformClient>) -> Dispatcher {
    let state = AppState::new(world.store.clone(), platform.clone());
    Dispatcher::start(state, Arc::new(EventRegistry::standard()), config())
}

fn tags_changed(member: &str, added: &[&str], removed: &[&str]) -> Event {
    Event::RoleTagsChanged {
        organization: "guild-1".into(),
        member: member.into(),
        added: set(added),
        removed: set(removed),
    }
}

#[tokio::test]
async fn tag_updates_reconcile_and_push_shared_tags() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let platform = Arc::new(RecordingPlatformClient::default());
    let dispatcher = start(&world, &platform);

    dispatcher
        .submit(tags_changed("u-ada", &["alpha-member"], &[]))
        .await
        .expect("submit");
    dispatcher
        .submit(tags_changed("u-ada", &["beta-member"], &["alpha-member"]))
        .await
        .expect("submit");
    dispatcher
        .submit(tags_changed("u-nobody", &["alpha-member"], &[]))
        .await
        .expect("submit");
    dispatcher.shutdown().await;

    assert_eq!(
        world.held_tags(ada.id).await,
        set(&["beta-member", "chess-member"])
    );
    assert_eq!(
        platform.calls(),
        vec![TagCall {
            op: "add",
            organization: "guild-1".into(),
            member: "u-ada".into(),
            tags: vec!["chess-member".into()],
        }]
    );
}

#[tokio::test]
async fn unknown_organization_is_skipped() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let platform = Arc::new(RecordingPlatformClient::default());
    let dispatcher = start(&world, &platform);

    dispatcher
        .submit(Event::RoleTagsChanged {
            organization: "guild-404".into(),
            member: "u-ada".into(),
            added: set(&["alpha-member"]),
            removed: BTreeSet::new(),
        })
        .await
        .expect("submit");
    dispatcher.shutdown().await;

    assert!(world.held_tags(ada.id).await.is_empty());
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn membership_events_flow_through_the_dispatcher() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let bob = world.member("bob").await;
    let platform = Arc::new(RecordingPlatformClient::default());

    let dispatcher = start(&world, &platform);
    for member in [ada.id, bob.id] {
        dispatcher
            .submit(Event::RequestAccess {
                member,
                organization: world.org.id,
                category: world.category.id,
                sub_group: None,
            })
            .await
            .expect("submit");
    }
    dispatcher.shutdown().await;

    let store: &dyn RosterStore = world.store.as_ref();
    let ada_request = store
        .find_request(ada.id, world.org.id, world.category.id)
        .await
        .expect("find")
        .expect("ada requested");
    let bob_request = store
        .find_request(bob.id, world.org.id, world.category.id)
        .await
        .expect("find")
        .expect("bob requested");

    let dispatcher = start(&world, &platform);
    let events = [
        Event::Accept {
            caller: world.owner.id,
            request: ada_request.id,
            sub_group: world.alpha.sub_group.id,
        },
        Event::Decline {
            caller: world.owner.id,
            request: bob_request.id,
        },
        // Already resolved; dropped as request_not_found.
        Event::Decline {
            caller: world.owner.id,
            request: ada_request.id,
        },
    ];
    for event in events {
        dispatcher.submit(event).await.expect("submit");
    }
    dispatcher.shutdown().await;

    assert_eq!(
        world.held_tags(ada.id).await,
        set(&["alpha-member", "chess-member"])
    );
    assert!(world.held_tags(bob.id).await.is_empty());
    assert!(store.get_request(bob_request.id).await.is_err());
    assert_eq!(
        platform.calls(),
        vec![TagCall {
            op: "add",
            organization: "guild-1".into(),
            member: "u-ada".into(),
            tags: vec!["alpha-member".into(), "chess-member".into()],
        }]
    );

    let dispatcher = start(&world, &platform);
    dispatcher
        .submit(Event::RemovePriorMembership {
            caller: world.owner.id,
            member: ada.id,
            sub_group: world.alpha.sub_group.id,
        })
        .await
        .expect("submit");
    dispatcher.shutdown().await;

    assert!(world.held_tags(ada.id).await.is_empty());
    let last = platform.calls().pop().expect("remove call");
    assert_eq!(last.op, "remove");
    assert_eq!(
        last.tags,
        vec!["alpha-member".to_string(), "chess-member".to_string()]
    );
}

#[tokio::test]
async fn every_event_about_a_member_shares_one_routing_key() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let request = world
        .store
        .create_request(NewMembershipRequest {
            member_id: ada.id,
            category_id: world.category.id,
            organization_id: world.org.id,
            sub_group_id: Some(world.placeholder.id),
        })
        .await
        .expect("request");
    let store: &dyn RosterStore = world.store.as_ref();

    let tags = routing_key(store, &tags_changed("u-ada", &["alpha-member"], &[])).await;
    let remove = routing_key(
        store,
        &Event::RemovePriorMembership {
            caller: world.owner.id,
            member: ada.id,
            sub_group: world.alpha.sub_group.id,
        },
    )
    .await;
    let decline = routing_key(
        store,
        &Event::Decline {
            caller: world.owner.id,
            request: request.id,
        },
    )
    .await;
    assert_eq!(tags, remove);
    assert_eq!(remove, decline);
}

#[tokio::test]
async fn interleaved_event_kinds_apply_in_submission_order() {
    let world = world(Arc::new(InMemoryStore::new())).await;
    let ada = world.member("ada").await;
    let platform = Arc::new(RecordingPlatformClient::default());
    let dispatcher = start(&world, &platform);

    for _ in 0..3 {
        dispatcher
            .submit(tags_changed("u-ada", &["alpha-member"], &[]))
            .await
            .expect("submit");
        dispatcher
            .submit(Event::RemovePriorMembership {
                caller: world.owner.id,
                member: ada.id,
                sub_group: world.alpha.sub_group.id,
            })
            .await
            .expect("submit");
    }
    dispatcher.shutdown().await;

    assert!(world.held_tags(ada.id).await.is_empty());
    let ops: Vec<_> = platform.calls().into_iter().map(|call| call.op).collect();
    assert_eq!(ops, vec!["add", "remove", "add", "remove", "add", "remove"]);
}

static FLAKY_ATTEMPTS: AtomicU32 = AtomicU32::new(0);
static BROKEN_ATTEMPTS: AtomicU32 = AtomicU32::new(0);

fn flaky(_: AppState, delivery: Delivery) -> HandlerFuture {
    async move {
        FLAKY_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
        if delivery.attempt < 3 {
            Err(RosterError::Store(anyhow::anyhow!("connection reset")))
        } else {
            Ok(Some(Outcome::default()))
        }
    }
    .boxed()
}

fn broken(_: AppState, _: Delivery) -> HandlerFuture {
    async move {
        BROKEN_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
        Err(RosterError::InvariantViolation("two placeholders".into()))
    }
    .boxed()
}

#[tokio::test]
async fn retryable_failures_are_replayed_and_others_dropped() {
    let store: Arc<dyn RosterStore> = Arc::new(InMemoryStore::new());
    let platform = Arc::new(RecordingPlatformClient::default());
    let mut registry = EventRegistry::new();
    registry
        .register(EventKind::RoleTagsChanged, flaky)
        .register(EventKind::Decline, broken);
    let dispatcher = Dispatcher::start(
        AppState::new(store, platform),
        Arc::new(registry),
        config(),
    );

    dispatcher
        .submit(tags_changed("u-ada", &["x"], &[]))
        .await
        .expect("submit");
    dispatcher
        .submit(Event::Decline {
            caller: MemberId(1),
            request: RequestId(2),
        })
        .await
        .expect("submit");
    // No handler for this kind; dropped without a panic.
    dispatcher
        .submit(Event::RemovePriorMembership {
            caller: MemberId(1),
            member: MemberId(2),
            sub_group: SubGroupId(3),
        })
        .await
        .expect("submit");
    dispatcher.shutdown().await;

    assert_eq!(FLAKY_ATTEMPTS.load(Ordering::SeqCst), 3);
    assert_eq!(BROKEN_ATTEMPTS.load(Ordering::SeqCst), 1);
}
