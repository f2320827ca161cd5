//! Roster application wiring.
//!
//! # Purpose
//! Defines the shared state handed to every event handler and builds the
//! configured store backend.
use crate::config::{RosterConfig, StorageBackend};
use crate::dispatch::locks::MemberLocks;
use crate::platform::PlatformClient;
use crate::store::RosterStore;
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PostgresStore;
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RosterStore>,
    pub platform: Arc<dyn PlatformClient>,
    /// Per-member serialization shared by every caller that mutates links.
    pub locks: MemberLocks,
}

impl AppState {
    pub fn new(store: Arc<dyn RosterStore>, platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            store,
            platform,
            locks: MemberLocks::default(),
        }
    }
}

pub async fn build_store(config: &RosterConfig) -> anyhow::Result<Arc<dyn RosterStore>> {
    let store: Arc<dyn RosterStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(
                PostgresStore::connect(pg)
                    .await
                    .context("connect postgres store")?,
            )
        }
    };
    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "store ready"
    );
    Ok(store)
}
