//! Role bookkeeping: the shared-role resolver and the reconciliation engine.
pub mod reconcile;
pub mod shared;

pub use reconcile::{Attempt, RoleTagDelta, reconcile};
pub use shared::{ensure_placeholder, find_placeholder, group_role, shared_role};
