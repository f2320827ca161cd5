//! Roster authorization.
//!
//! # Purpose
//! Groups the permission predicate evaluator and the criteria sets the
//! workflows authorize against.
pub mod permission;

pub use permission::{
    group_leads, has_permission, org_admins, org_owners, require_permission, sub_group_managers,
};
