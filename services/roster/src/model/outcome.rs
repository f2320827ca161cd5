//! Result values returned by reconciliation and membership workflows.
//!
//! # Purpose
//! Workflows return data, never formatted messages. Callers push `tags` to the
//! platform and render `advisories` however their surface needs.
use super::{Role, RoleId, SubGroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// External tags the caller must add to or remove from the member on the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPush {
    pub add: BTreeSet<String>,
    pub remove: BTreeSet<String>,
}

impl TagPush {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    pub fn add_role(&mut self, role: &Role) {
        if let Some(tag) = &role.external_tag {
            self.remove.remove(tag);
            self.add.insert(tag.clone());
        }
    }

    pub fn remove_role(&mut self, role: &Role) {
        if let Some(tag) = &role.external_tag {
            self.add.remove(tag);
            self.remove.insert(tag.clone());
        }
    }
}

/// Non-fatal notice for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Advisory {
    /// The member already holds a group-member role on another real sub-group of
    /// the same category. Cleanup is left to an explicit removal call.
    AlreadyInSubGroup {
        sub_group_id: SubGroupId,
        display_name: String,
        role_tag: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Links created by this call, after cancelling links that were also removed.
    pub links_added: Vec<Role>,
    /// Links deleted by this call, after cancelling links that were also created.
    pub links_removed: Vec<Role>,
    pub tags: TagPush,
    pub advisories: Vec<Advisory>,
    /// Roles the member holds in the organization once the call completed.
    /// Left empty when the call changed nothing.
    pub held_roles: Vec<RoleId>,
}

impl Outcome {
    pub fn has_link_changes(&self) -> bool {
        !self.links_added.is_empty() || !self.links_removed.is_empty()
    }

    /// Drop roles that appear in both `links_added` and `links_removed`.
    pub(crate) fn cancel_round_trips(&mut self) {
        let added: BTreeSet<RoleId> = self.links_added.iter().map(|role| role.id).collect();
        let removed: BTreeSet<RoleId> = self.links_removed.iter().map(|role| role.id).collect();
        let both: BTreeSet<RoleId> = added.intersection(&removed).copied().collect();
        if both.is_empty() {
            return;
        }
        self.links_added.retain(|role| !both.contains(&role.id));
        self.links_removed.retain(|role| !both.contains(&role.id));
    }
}
