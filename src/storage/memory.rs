//! In-memory implementation of KeyValueStore.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::storage::{KeyValueStore, StorageError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// MemoryStore keeps records in a process-local map with lazy expiry.
///
/// Deadlines use `tokio::time::Instant`, so paused-clock tests can advance them.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of a key, or None if it has none or is missing.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    StorageError::InvalidData(format!("value at {} is not an integer", key))
                })?;
                let next = current.checked_add(1).ok_or_else(|| {
                    StorageError::InvalidData(format!("value at {} is not an integer", key))
                })?;
                entry.value = next.to_string();
                Ok(next)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_expires() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_incr_creates_and_increments() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.get("n").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = MemoryStore::new();
        store.set("n", "abc", None).await.unwrap();
        let result = store.incr("n").await;
        assert!(matches!(result, Err(StorageError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_incr_rejects_overflow() {
        let store = MemoryStore::new();
        store.set("n", &i64::MAX.to_string(), None).await.unwrap();
        assert!(matches!(
            store.incr("n").await,
            Err(StorageError::InvalidData(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_keeps_ttl() {
        let store = MemoryStore::new();
        store.incr("n").await.unwrap();
        assert!(store.expire("n", Duration::from_secs(60)).await.unwrap());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.ttl("n").await, Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_after_expiry_restarts_at_one() {
        let store = MemoryStore::new();
        store.incr("n").await.unwrap();
        store.incr("n").await.unwrap();
        store.expire("n", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.incr("n").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_del_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        store.del("k").await.unwrap();
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
