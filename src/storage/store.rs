use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised by a cache backend.
///
/// Callers in the conversion pipeline never propagate these: a failed read
/// becomes a fetch, a failed write is logged and dropped.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing database rejected the operation
    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backing database could not be opened or migrated
    #[error("Cache setup failed: {0}")]
    Setup(String),
}

/// A key-value service with per-key atomic `get`/`set` and expiring entries.
///
/// This is the seam to whatever cache the process is deployed with. The
/// conversion pipeline only needs these two operations, and assumes no
/// locking beyond what the backend does per key.
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored bytes, or `None` on a miss or an expired entry.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;

    /// Stores `value` under `key` for `ttl_secs` seconds, replacing any
    /// previous entry.
    fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: u32,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process store bounded by entry count, evicting least recently used.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    /// Default number of feeds kept in memory.
    pub const DEFAULT_CAPACITY: usize = 128;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
        }

        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u32) -> Result<(), CacheError> {
        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: Instant::now() + Duration::from_secs(u64::from(ttl_secs)),
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::default();
        store.set("http://a/feed", b"<rss/>", 60).await.unwrap();

        let value = store.get("http://a/feed").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"<rss/>"[..]));
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let store = MemoryStore::default();
        assert!(store.get("http://missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_expired() {
        let store = MemoryStore::default();
        store.set("k", b"v", 0).await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty(), "expired entry should be evicted on read");
    }

    #[tokio::test]
    async fn test_replace_overwrites() {
        let store = MemoryStore::default();
        store.set("k", b"old", 60).await.unwrap();
        store.set("k", b"new", 60).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"new"[..]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let store = MemoryStore::new(2);
        store.set("a", b"1", 60).await.unwrap();
        store.set("b", b"2", 60).await.unwrap();
        // Touch "a" so "b" becomes least recently used
        store.get("a").await.unwrap();
        store.set("c", b"3", 60).await.unwrap();

        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let store = MemoryStore::new(0);
        assert!(store.is_empty());
    }
}
