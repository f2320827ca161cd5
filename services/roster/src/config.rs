//! Roster service configuration.
//!
//! Values come from `ROSTER_*` environment variables. When `ROSTER_CONFIG`
//! names a YAML file, fields present in that file override the environment.
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9090";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pg_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_pg_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_PG_MAX_CONNECTIONS,
            connect_timeout_ms: DEFAULT_PG_CONNECT_TIMEOUT_MS,
            acquire_timeout_ms: DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
        }
    }
}

fn default_pg_max_connections() -> u32 {
    DEFAULT_PG_MAX_CONNECTIONS
}

fn default_pg_connect_timeout_ms() -> u64 {
    DEFAULT_PG_CONNECT_TIMEOUT_MS
}

fn default_pg_acquire_timeout_ms() -> u64 {
    DEFAULT_PG_ACQUIRE_TIMEOUT_MS
}

// Roster configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct RosterConfig {
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    /// Number of dispatcher workers; events of one member always land on the same worker.
    pub workers: usize,
    /// Bounded queue depth per worker.
    pub queue_capacity: usize,
    /// Attempts per event, counting the first one.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RosterConfigOverride {
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    max_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("parse {name}")),
        Err(_) => Ok(default),
    }
}

impl RosterConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = std::env::var("ROSTER_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse ROSTER_METRICS_BIND")?;
        let storage = match std::env::var("ROSTER_STORAGE") {
            Ok(raw) => raw.parse().with_context(|| "parse ROSTER_STORAGE")?,
            Err(_) => StorageBackend::default(),
        };
        let postgres = match std::env::var("ROSTER_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                max_connections: env_parse(
                    "ROSTER_POSTGRES_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS,
                )?,
                ..PostgresConfig::new(url)
            }),
            Err(_) => None,
        };
        let config = Self {
            metrics_bind,
            storage,
            postgres,
            workers: env_parse("ROSTER_WORKERS", DEFAULT_WORKERS)?,
            queue_capacity: env_parse("ROSTER_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            max_attempts: env_parse("ROSTER_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            retry_backoff_ms: env_parse("ROSTER_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("ROSTER_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read ROSTER_CONFIG: {path}"))?;
            let override_cfg: RosterConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse roster config yaml")?;
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.storage {
                config.storage = value;
            }
            if let Some(value) = override_cfg.postgres {
                config.postgres = Some(value);
            }
            if let Some(value) = override_cfg.workers {
                config.workers = value;
            }
            if let Some(value) = override_cfg.queue_capacity {
                config.queue_capacity = value;
            }
            if let Some(value) = override_cfg.max_attempts {
                config.max_attempts = value;
            }
            if let Some(value) = override_cfg.retry_backoff_ms {
                config.retry_backoff_ms = value;
            }
            config.validate()?;
        }
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("postgres storage requires ROSTER_POSTGRES_URL");
        }
        Ok(())
    }
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 9090)),
            storage: StorageBackend::Memory,
            postgres: None,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}
