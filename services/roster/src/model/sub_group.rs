//! Sub-group records.
//!
//! # Purpose
//! A sub-group is one real group inside an organization's category, or the
//! category's placeholder.
//!
//! # Key invariants
//! - `(organization_id, category_id, external_id)` is unique.
//! - A sub-group whose `external_id` is empty is the placeholder for its
//!   category: it marks the category as enabled for the organization and owns
//!   the shared roles.
use super::{CategoryId, OrganizationId, SubGroupId};
use serde::{Deserialize, Serialize};

/// External in-category identifier carried by placeholder sub-groups.
pub const PLACEHOLDER_EXTERNAL_ID: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroup {
    pub id: SubGroupId,
    pub organization_id: OrganizationId,
    pub category_id: CategoryId,
    pub external_id: String,
    pub display_name: String,
    pub active: bool,
}

impl SubGroup {
    pub fn is_placeholder(&self) -> bool {
        self.external_id == PLACEHOLDER_EXTERNAL_ID
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubGroup {
    pub organization_id: OrganizationId,
    pub category_id: CategoryId,
    pub external_id: String,
    pub display_name: String,
}

impl NewSubGroup {
    pub fn placeholder(
        organization_id: OrganizationId,
        category_id: CategoryId,
        display_name: String,
    ) -> Self {
        Self {
            organization_id,
            category_id,
            external_id: PLACEHOLDER_EXTERNAL_ID.to_string(),
            display_name,
        }
    }
}
