//! Configuration for sprint-storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sprint-storage")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Interface the HTTP API binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// SQLite busy timeout before a request fails as retryable
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// How long a captured idempotent response can be replayed
    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: u64,

    /// Interval of the expired idempotency record purge
    #[serde(default = "default_purge_interval")]
    pub idempotency_purge_interval_secs: u64,

    /// Maximum items per batch request
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,

    /// Page size when a list request omits `limit`
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,

    /// Upper bound for `limit` on list requests
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: usize,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8095
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_idempotency_ttl_hours() -> u64 {
    48
}

fn default_purge_interval() -> u64 {
    3_600
}

fn default_max_batch_items() -> usize {
    100
}

fn default_page_limit() -> usize {
    50
}

fn default_max_page_limit() -> usize {
    100
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            busy_timeout_ms: default_busy_timeout_ms(),
            idempotency_ttl_hours: default_idempotency_ttl_hours(),
            idempotency_purge_interval_secs: default_purge_interval(),
            max_batch_items: default_max_batch_items(),
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the write path cannot honor
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.max_batch_items == 0 {
            return Err(StorageError::Config("max_batch_items must be at least 1".into()));
        }
        if self.max_page_limit == 0 {
            return Err(StorageError::Config("max_page_limit must be at least 1".into()));
        }
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(StorageError::Config(format!(
                "default_page_limit must be between 1 and max_page_limit ({})",
                self.max_page_limit
            )));
        }
        if self.idempotency_ttl_hours == 0 {
            return Err(StorageError::Config("idempotency_ttl_hours must be at least 1".into()));
        }
        Ok(())
    }

    /// Idempotency retention window in milliseconds
    pub fn idempotency_ttl_ms(&self) -> i64 {
        (self.idempotency_ttl_hours as i64) * 60 * 60 * 1000
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("sprint.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
