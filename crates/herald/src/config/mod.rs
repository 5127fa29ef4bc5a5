use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::broker::{BrokerConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_EVENTS};
use crate::error::StoreError;
use crate::store::{DEFAULT_MEMORY_MAX_EVENTS, MemoryStore, PersistenceStore, SqliteStore};

/// Which persistence store the manager is wired to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Events are only kept in broker history.
    #[default]
    None,
    Memory,
    Sqlite,
}

/// Per-broker sizing (`[broker]`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Capacity of each subscriber channel (default: 64)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Events kept in each broker's history (default: 1000)
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

/// Durable storage (`[persistence]`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PersistenceSettings {
    #[serde(default)]
    pub backend: Backend,
    /// Capacity of the memory backend (default: 10000)
    #[serde(default = "default_memory_max_events")]
    pub memory_max_events: usize,
    /// SQLite database file (default: herald.db)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Delete persisted events older than this. Unset disables retention.
    #[serde(default)]
    pub retention_hours: Option<u64>,
    /// How often retention runs (default: 3600)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            backend: Backend::None,
            memory_max_events: DEFAULT_MEMORY_MAX_EVENTS,
            database_path: default_database_path(),
            retention_hours: None,
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_memory_max_events() -> usize {
    DEFAULT_MEMORY_MAX_EVENTS
}

fn default_database_path() -> PathBuf {
    PathBuf::from("herald.db")
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl PersistenceSettings {
    /// Retention window, if configured.
    pub fn max_age(&self) -> Option<Duration> {
        self.retention_hours
            .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with defaults
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (not tracked by git)
            .add_source(File::with_name("config/local").required(false))
            // e.g. HERALD__BROKER__BUFFER_SIZE=128
            .add_source(
                Environment::with_prefix("HERALD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            buffer_size: self.broker.buffer_size,
            max_events: self.broker.max_events,
        }
    }

    /// Open the configured persistence store, if any.
    pub fn build_store(&self) -> Result<Option<Arc<dyn PersistenceStore>>, StoreError> {
        let store: Arc<dyn PersistenceStore> = match self.persistence.backend {
            Backend::None => return Ok(None),
            Backend::Memory => Arc::new(MemoryStore::new(self.persistence.memory_max_events)),
            Backend::Sqlite => Arc::new(SqliteStore::open(&self.persistence.database_path)?),
        };
        Ok(Some(store))
    }
}
