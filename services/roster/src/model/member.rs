use super::MemberId;
use serde::{Deserialize, Serialize};

/// A person known to the roster. Soft-deleted through `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub display_name: String,
    /// External platform member identifier, unique when present.
    pub external_id: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub display_name: String,
    pub external_id: Option<String>,
}
