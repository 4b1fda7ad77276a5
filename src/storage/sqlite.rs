//! SQLite implementation of KeyValueStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::storage::{KeyValueStore, StorageError};

/// SqliteStore implements KeyValueStore on a single `kv` table.
///
/// Expiry is stored as unix milliseconds and checked on read; expired rows are
/// removed by `purge_expired`, which also runs when the store is opened.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

/// SqliteStoreConfig holds SQLite store configuration.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the SQLite database file.
    pub path: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            path: "risk_state.db".to_string(),
            max_connections: 5,
        }
    }
}

/// How long a connection waits for another writer before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn deadline_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl SqliteStore {
    /// Opens (creating if missing) the database and runs migrations.
    pub async fn new(config: SqliteStoreConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };

        store.migrate().await?;
        let purged = store.purge_expired().await?;

        info!(path = %config.path, purged, "SQLite store initialized");
        Ok(store)
    }

    /// Runs database migrations to create the schema.
    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Deletes expired rows. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let result =
            sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .bind(now_millis())
                .execute(&self.pool)
                .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "Expired keys purged");
        }
        Ok(purged)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query(
            "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.map(deadline_millis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        // Single statement. An expired row restarts at 1 without a TTL; a
        // non-integer or maxed-out value is left untouched and yields no row.
        let row = sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at) VALUES (?1, '1', NULL)
            ON CONFLICT(key) DO UPDATE SET
                value = CASE
                    WHEN expires_at IS NOT NULL AND expires_at <= ?2 THEN '1'
                    ELSE CAST(CAST(value AS INTEGER) + 1 AS TEXT)
                END,
                expires_at = CASE
                    WHEN expires_at IS NOT NULL AND expires_at <= ?2 THEN NULL
                    ELSE expires_at
                END
            WHERE (expires_at IS NOT NULL AND expires_at <= ?2)
                OR (CAST(CAST(value AS INTEGER) AS TEXT) = value
                    AND CAST(value AS INTEGER) < 9223372036854775807)
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        let invalid = || StorageError::InvalidData(format!("value at {} is not an integer", key));
        let value: String = match row {
            Some(row) => row.try_get("value")?,
            None => return Err(invalid()),
        };
        value.parse().map_err(|_| invalid())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE kv SET expires_at = ?1 WHERE key = ?2 AND (expires_at IS NULL OR expires_at > ?3)",
        )
        .bind(deadline_millis(ttl))
        .bind(key)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn del(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}
