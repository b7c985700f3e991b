//! In-process working-memory backend
//!
//! TTL map with a size cap. Eviction is approximate LRU: the `lru` crate
//! tracks recency per key, and inserts beyond the cap push out the least
//! recently used entry.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use hopper_core::Result;

use super::MemoryBackend;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Map-backed [`MemoryBackend`] with per-entry expiration
pub struct LocalBackend {
    store: Mutex<LruCache<String, Entry>>,
}

impl LocalBackend {
    /// Create with an entry cap
    ///
    /// # Panics
    ///
    /// Panics if `max_entries` is zero.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).expect("max_entries must be non-zero");
        Self {
            store: Mutex::new(LruCache::new(cap)),
        }
    }
}

#[async_trait]
impl MemoryBackend for LocalBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut store = self.store.lock();
        let now = Instant::now();

        let expired = store.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            store.pop(key);
            return Ok(None);
        }
        Ok(store.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.store.lock().put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.lock().pop(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let store = self.store.lock();
        Ok(store
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn clear(&self) -> Result<usize> {
        let mut store = self.store.lock();
        let count = store.len();
        store.clear();
        Ok(count)
    }

    async fn clear_expired(&self) -> Result<usize> {
        let mut store = self.store.lock();
        let now = Instant::now();
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            store.pop(key);
        }
        Ok(expired.len())
    }

    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        let store = self.store.lock();
        Ok(store
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let backend = LocalBackend::new(8);
        backend.set("k", json!({"v": 1}), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(json!({"v": 1})));
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn expiry_and_sweep() {
        let backend = LocalBackend::new(8);
        backend
            .set("gone", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        backend.set("kept", json!(2), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(backend.clear_expired().await.unwrap(), 1);
        assert_eq!(backend.clear_expired().await.unwrap(), 0);
        assert_eq!(backend.len().await.unwrap(), 1);
        assert!(backend.get("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cap_evicts_least_recently_used() {
        let backend = LocalBackend::new(2);
        backend.set("a", json!(1), None).await.unwrap();
        backend.set("b", json!(2), None).await.unwrap();

        // Touch "a" so "b" is the eviction candidate.
        backend.get("a").await.unwrap();
        backend.set("c", json!(3), None).await.unwrap();

        assert!(backend.get("a").await.unwrap().is_some());
        assert!(backend.get("b").await.unwrap().is_none());
        assert!(backend.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let backend = LocalBackend::new(8);
        backend.set("context:1", json!(1), None).await.unwrap();
        backend.set("context:2", json!(2), None).await.unwrap();
        backend.set("session:1", json!(3), None).await.unwrap();

        let mut keys = backend.keys("context:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["context:1", "context:2"]);
    }
}
