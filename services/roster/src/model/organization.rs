//! Organization records.
//!
//! # Purpose
//! An organization is the top-level tenant and maps to exactly one external
//! community. Deactivation flips `active`; rows are never hard-deleted.
use super::OrganizationId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub display_name: String,
    /// External community identifier, unique when present.
    pub external_id: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganization {
    pub display_name: String,
    pub external_id: Option<String>,
}
