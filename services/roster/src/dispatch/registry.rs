//! Event handler registry.
//!
//! # Purpose
//! Maps each [`EventKind`] to the handler that resolves the event's entities,
//! serializes on the affected member, runs the workflow and pushes the
//! resulting tags.
//!
//! # Key invariants
//! - Every handler holds the member's lock from [`crate::dispatch::locks`] for
//!   the whole workflow, including the tag push.
//! - Tag updates for an unknown or inactive organization or member are skipped,
//!   not failed.
use crate::app::AppState;
use crate::dispatch::{Event, EventKind};
use crate::error::{RosterError, RosterResult};
use crate::membership;
use crate::model::{MemberId, MembershipRequest, OrganizationId, Outcome, RequestId};
use crate::platform::push_tags;
use crate::roles::{Attempt, RoleTagDelta, reconcile};
use crate::store::{Activity, StoreError};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;

/// An event as handed to a handler. `attempt` starts at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: Event,
    pub attempt: u32,
}

pub type HandlerFuture = BoxFuture<'static, RosterResult<Option<Outcome>>>;

/// `Ok(None)` means the event was skipped without touching the store.
pub type Handler = fn(AppState, Delivery) -> HandlerFuture;

#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<EventKind, Handler>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a handler for every event kind.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry
            .register(EventKind::RoleTagsChanged, handle_role_tags_changed)
            .register(EventKind::RequestAccess, handle_request_access)
            .register(EventKind::Accept, handle_accept)
            .register(EventKind::Decline, handle_decline)
            .register(EventKind::RemovePriorMembership, handle_remove_prior_membership);
        registry
    }

    pub fn register(&mut self, kind: EventKind, handler: Handler) -> &mut Self {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::debug!(%kind, "handler replaced");
        }
        self
    }

    pub fn handler(&self, kind: EventKind) -> Option<Handler> {
        self.handlers.get(&kind).copied()
    }
}

fn handle_role_tags_changed(state: AppState, delivery: Delivery) -> HandlerFuture {
    role_tags_changed(state, delivery).boxed()
}

fn handle_request_access(state: AppState, delivery: Delivery) -> HandlerFuture {
    request_access(state, delivery).boxed()
}

fn handle_accept(state: AppState, delivery: Delivery) -> HandlerFuture {
    accept(state, delivery).boxed()
}

fn handle_decline(state: AppState, delivery: Delivery) -> HandlerFuture {
    decline(state, delivery).boxed()
}

fn handle_remove_prior_membership(state: AppState, delivery: Delivery) -> HandlerFuture {
    remove_prior_membership(state, delivery).boxed()
}

async fn role_tags_changed(state: AppState, delivery: Delivery) -> RosterResult<Option<Outcome>> {
    let Event::RoleTagsChanged {
        organization: organization_ref,
        member: member_ref,
        added,
        removed,
    } = delivery.event
    else {
        return Err(wrong_event(EventKind::RoleTagsChanged));
    };
    let store = state.store.as_ref();
    let Some(organization) = store
        .find_organization_by_external_id(&organization_ref, Activity::ActiveOnly)
        .await?
    else {
        tracing::debug!(
            organization = %organization_ref,
            "tag update for unknown organization skipped"
        );
        return Ok(None);
    };
    let Some(member) = store
        .find_member_by_external_id(&member_ref, Activity::ActiveOnly)
        .await?
    else {
        tracing::debug!(member = %member_ref, "tag update for unknown member skipped");
        return Ok(None);
    };

    let _guard = state.locks.lock(organization.id, member.id).await;
    let delta = RoleTagDelta { added, removed };
    let outcome = reconcile(
        store,
        member.id,
        organization.id,
        &delta,
        Attempt::from_number(delivery.attempt),
    )
    .await?;
    push_tags(state.platform.as_ref(), &organization, &member, &outcome.tags).await;
    Ok(Some(outcome))
}

async fn request_access(state: AppState, delivery: Delivery) -> RosterResult<Option<Outcome>> {
    let Event::RequestAccess {
        member,
        organization,
        category,
        sub_group,
    } = delivery.event
    else {
        return Err(wrong_event(EventKind::RequestAccess));
    };
    let _guard = state.locks.lock(organization, member).await;
    membership::request_access(state.store.as_ref(), member, organization, category, sub_group)
        .await?;
    Ok(Some(Outcome::default()))
}

async fn accept(state: AppState, delivery: Delivery) -> RosterResult<Option<Outcome>> {
    let Event::Accept {
        caller,
        request,
        sub_group,
    } = delivery.event
    else {
        return Err(wrong_event(EventKind::Accept));
    };
    let request = load_request(&state, request).await?;
    let _guard = state
        .locks
        .lock(request.organization_id, request.member_id)
        .await;
    let outcome = membership::accept(state.store.as_ref(), caller, request.id, sub_group).await?;
    push_outcome(&state, request.organization_id, request.member_id, &outcome).await;
    Ok(Some(outcome))
}

async fn decline(state: AppState, delivery: Delivery) -> RosterResult<Option<Outcome>> {
    let Event::Decline { caller, request } = delivery.event else {
        return Err(wrong_event(EventKind::Decline));
    };
    let request = load_request(&state, request).await?;
    let _guard = state
        .locks
        .lock(request.organization_id, request.member_id)
        .await;
    let outcome = membership::decline(state.store.as_ref(), caller, request.id).await?;
    Ok(Some(outcome))
}

async fn remove_prior_membership(
    state: AppState,
    delivery: Delivery,
) -> RosterResult<Option<Outcome>> {
    let Event::RemovePriorMembership {
        caller,
        member,
        sub_group,
    } = delivery.event
    else {
        return Err(wrong_event(EventKind::RemovePriorMembership));
    };
    let organization_id = state
        .store
        .get_sub_group(sub_group, Activity::IncludeInactive)
        .await?
        .organization_id;
    let _guard = state.locks.lock(organization_id, member).await;
    let outcome =
        membership::remove_prior_membership(state.store.as_ref(), caller, member, sub_group)
            .await?;
    push_outcome(&state, organization_id, member, &outcome).await;
    Ok(Some(outcome))
}

async fn load_request(state: &AppState, request_id: RequestId) -> RosterResult<MembershipRequest> {
    state
        .store
        .get_request(request_id)
        .await
        .map_err(|err| match err {
            StoreError::NotFound(_) => RosterError::RequestNotFound,
            other => other.into(),
        })
}

/// Push the tags of an already committed workflow. Lookup failures are logged
/// only; replaying the workflow would not reach the push again.
async fn push_outcome(
    state: &AppState,
    organization_id: OrganizationId,
    member_id: MemberId,
    outcome: &Outcome,
) {
    if outcome.tags.is_empty() {
        return;
    }
    let store = state.store.as_ref();
    let entities = async {
        let organization = store
            .get_organization(organization_id, Activity::IncludeInactive)
            .await?;
        let member = store.get_member(member_id, Activity::IncludeInactive).await?;
        Ok::<_, StoreError>((organization, member))
    }
    .await;
    match entities {
        Ok((organization, member)) => {
            push_tags(state.platform.as_ref(), &organization, &member, &outcome.tags).await;
        }
        Err(err) => {
            metrics::counter!("roster_tag_push_failures_total", "op" => "lookup").increment(1);
            tracing::warn!(error = %err, member = %member_id, "tag push skipped");
        }
    }
}

fn wrong_event(expected: EventKind) -> RosterError {
    RosterError::InvariantViolation(format!("{expected} handler received another event kind"))
}
