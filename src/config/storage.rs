//! Shared store configuration.

use serde::Deserialize;

/// Backing store for loss and throttle records.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// "memory" (default) or "sqlite".
    pub backend: Option<String>,
    /// Path to the SQLite database file.
    pub path: Option<String>,
    /// Maximum number of pooled SQLite connections.
    pub max_connections: Option<u32>,
}
