//! Domain error taxonomy for the reconciliation engine and membership workflows.
//!
//! # Key invariants
//! - `NotFound` and `PermissionDenied` render identical text so a rejected
//!   caller cannot probe which entities exist. `Debug` keeps the distinction for
//!   server-side logs.
//! - `InvariantViolation` is never swallowed; it points at a store integrity bug
//!   or an upsert race.
//! - Only store failures are retryable. Every step is idempotent, so a retry
//!   replays the whole operation from scratch.
use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Organization,
    Category,
    SubGroup,
    Role,
    Member,
    Request,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Organization => "organization",
            Entity::Category => "category",
            Entity::SubGroup => "sub-group",
            Entity::Role => "role",
            Entity::Member => "member",
            Entity::Request => "membership request",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("not found or not permitted")]
    NotFound(Entity),
    #[error("not found or not permitted")]
    PermissionDenied,
    #[error("membership request not found")]
    RequestNotFound,
    #[error("category is not supported in this organization")]
    CategoryNotSupported,
    #[error("a membership request for this category already exists")]
    AlreadyRequested,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("store failure: {0}")]
    Store(#[source] anyhow::Error),
}

pub type RosterResult<T> = Result<T, RosterError>;

impl RosterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RosterError::Store(_))
    }

    /// Stable machine-readable code for metrics labels and caller responses.
    pub fn code(&self) -> &'static str {
        match self {
            // Shared code: see module invariants.
            RosterError::NotFound(_) | RosterError::PermissionDenied => "not_found",
            RosterError::RequestNotFound => "request_not_found",
            RosterError::CategoryNotSupported => "category_not_supported",
            RosterError::AlreadyRequested => "already_requested",
            RosterError::InvalidInput(_) => "invalid_input",
            RosterError::InvariantViolation(_) => "invariant_violation",
            RosterError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for RosterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => RosterError::NotFound(entity),
            StoreError::Conflict(message) => RosterError::InvariantViolation(message),
            StoreError::Unexpected(err) => RosterError::Store(err),
        }
    }
}
