//! Reconciliation engine.
//!
//! # Purpose
//! Applies one observed platform tag delta for one member to the member's
//! links in one organization, then repairs the shared roles the change
//! affected.
//!
//! # Algorithm
//! 1. Delete links to roles whose tag was removed.
//! 2. Create links to roles whose tag was added.
//! 3. Stop when steps 1 and 2 changed nothing, unless this run is a retry.
//! 4. Demote and promote shared roles (see [`super::shared::plan`]).
//! 5. Report the shared-role tags to push and the final held role set. A
//!    retry restates the shared tags of the categories the delta touched.
//!
//! # Key invariants
//! - Every step is idempotent and commits on its own; a failed or cancelled
//!   run is retried from scratch by the caller, never rolled back.
//! - Tags of other organizations are ignored: lookups are scoped to
//!   `organization_id`.
//! - Tags from steps 1 and 2 are already on the platform and are not echoed
//!   back in [`Outcome::tags`].
//! - A retry cannot tell which shared links the failed attempt already pushed,
//!   so it reports the full shared-tag state instead of the net change.
use super::shared::{apply_shared_roles, restate_shared_tags};
use crate::error::RosterResult;
use crate::model::{MemberId, OrganizationId, Outcome};
use crate::store::RosterStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tags added to and removed from a member by one platform update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTagDelta {
    #[serde(default)]
    pub added: BTreeSet<String>,
    #[serde(default)]
    pub removed: BTreeSet<String>,
}

/// Whether a run replays an event whose earlier attempt failed.
///
/// A failed attempt may have committed steps 1 and 2 before failing in step 4,
/// so a retry always recomputes shared roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Attempt {
    #[default]
    First,
    Retry,
}

impl Attempt {
    pub fn from_number(attempt: u32) -> Self {
        if attempt > 1 {
            Attempt::Retry
        } else {
            Attempt::First
        }
    }
}

impl RoleTagDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[tracing::instrument(
    skip(store, delta),
    fields(added = delta.added.len(), removed = delta.removed.len())
)]
pub async fn reconcile(
    store: &dyn RosterStore,
    member_id: MemberId,
    organization_id: OrganizationId,
    delta: &RoleTagDelta,
    attempt: Attempt,
) -> RosterResult<Outcome> {
    let mut outcome = Outcome::default();
    let mut touched = Vec::new();

    let removed: Vec<String> = delta.removed.iter().cloned().collect();
    for role in store.find_roles_by_tags(organization_id, &removed).await? {
        if store.delete_link(member_id, role.id).await? {
            metrics::counter!("roster_links_deleted_total").increment(1);
            outcome.links_removed.push(role.clone());
        }
        touched.push(role);
    }

    let added: Vec<String> = delta.added.iter().cloned().collect();
    for role in store.find_roles_by_tags(organization_id, &added).await? {
        if store.create_link(member_id, role.id).await? {
            metrics::counter!("roster_links_created_total").increment(1);
            outcome.links_added.push(role.clone());
        }
        touched.push(role);
    }

    outcome.cancel_round_trips();
    if !outcome.has_link_changes() && attempt == Attempt::First {
        metrics::counter!("roster_reconcile_total", "outcome" => "noop").increment(1);
        return Ok(outcome);
    }

    let held = store.list_member_roles(member_id, organization_id).await?;
    apply_shared_roles(store, member_id, &held, &mut outcome).await?;
    outcome.cancel_round_trips();

    let held = store.list_member_roles(member_id, organization_id).await?;
    if attempt == Attempt::Retry {
        restate_shared_tags(store, &held, &touched, &mut outcome.tags).await?;
    }
    outcome.held_roles = held.into_iter().map(|held| held.role.id).collect();
    metrics::counter!("roster_reconcile_total", "outcome" => "changed").increment(1);
    Ok(outcome)
}
