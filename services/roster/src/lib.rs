//! Roster: role-tag reconciliation and membership workflows.
//!
//! # Purpose
//! Keeps the store's member/role links in step with the role tags an external
//! platform reports, maintains per-category shared roles, and runs the
//! membership request workflow. The binary feeds events from stdin through
//! [`dispatch::Dispatcher`].
pub mod app;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod membership;
pub mod model;
pub mod observability;
pub mod platform;
pub mod roles;
pub mod setup;
pub mod store;
