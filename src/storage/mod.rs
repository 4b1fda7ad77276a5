//! Shared key-value store for loss and throttle records.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SqliteStoreConfig};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::StorageConfig;

/// KeyValueStore is the subset of a Redis-like store used by the risk state.
///
/// Each operation touches a single key; no multi-key transactions are needed.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get returns the value for a key, or None if missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Set stores a value, replacing any previous value and TTL.
    /// `None` keeps the key until it is deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Incr atomically increments an integer value, creating it at 1.
    /// An existing TTL is preserved.
    async fn incr(&self, key: &str) -> Result<i64, StorageError>;

    /// Expire sets a TTL on an existing key. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Del removes a key. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), StorageError>;

    /// Close releases the underlying connection.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// StorageError represents errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Opens the store selected by the configuration. Defaults to in-memory.
pub async fn open_store(
    config: Option<&StorageConfig>,
) -> Result<Arc<dyn KeyValueStore>, StorageError> {
    let backend = config.and_then(|c| c.backend.as_deref()).unwrap_or("memory");

    match backend {
        "sqlite" => {
            let mut sqlite_config = SqliteStoreConfig::default();
            if let Some(cfg) = config {
                if let Some(ref path) = cfg.path {
                    sqlite_config.path = path.clone();
                }
                if let Some(max) = cfg.max_connections {
                    sqlite_config.max_connections = max;
                }
            }
            let store = SqliteStore::new(sqlite_config).await?;
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(StorageError::InvalidData(format!(
            "unknown storage backend: {}",
            other
        ))),
    }
}
