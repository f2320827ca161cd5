use super::CategoryId;
use serde::{Deserialize, Serialize};

/// Domain partition sub-groups are grouped under (one supported game, for example).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}
