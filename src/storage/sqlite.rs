use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::store::{CacheError, KeyValueStore};

// ============================================================================
// SQLite-backed cache
// ============================================================================

/// Feed cache persisted in a SQLite file.
///
/// Opened once at process start and closed on shutdown; clones share the
/// same pool. Expiry is stored as a unix timestamp and enforced on read.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the cache database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        let in_memory = path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?.create_if_missing(true)
        };
        // busy_timeout=5000: wait up to 5 seconds for locks before SQLITE_BUSY
        let options = options.pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store
            .migrate()
            .await
            .map_err(|e| CacheError::Setup(e.to_string()))?;

        tracing::debug!(path = %path, "Opened feed cache database");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_cache (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feed_cache_expires ON feed_cache(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete all expired entries, returning how many were removed.
    pub async fn evict_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM feed_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Close the pool, waiting for in-flight queries to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM feed_cache WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(Utc::now().timestamp())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u32) -> Result<(), CacheError> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO feed_cache (key, value, stored_at, expires_at)
            VALUES (?, ?, ?, ?)
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now + i64::from(ttl_secs))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = test_store().await;
        store
            .set("http://example.com/feed", b"<rss></rss>", 3600)
            .await
            .unwrap();

        let value = store.get("http://example.com/feed").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"<rss></rss>"[..]));
    }

    #[tokio::test]
    async fn test_missing_key_returns_none() {
        let store = test_store().await;
        assert!(store.get("http://nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_updates_value() {
        let store = test_store().await;
        store.set("k", b"original", 3600).await.unwrap();
        store.set("k", b"updated", 3600).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"updated"[..]));
    }

    #[tokio::test]
    async fn test_expired_entry_not_returned() {
        let store = test_store().await;

        sqlx::query(
            "INSERT INTO feed_cache (key, value, stored_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind("stale")
        .bind(&b"old"[..])
        .bind(Utc::now().timestamp() - 7200)
        .bind(Utc::now().timestamp() - 1)
        .execute(&store.pool)
        .await
        .unwrap();

        assert!(store.get("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let store = test_store().await;
        store.set("fresh", b"1", 3600).await.unwrap();

        sqlx::query(
            "INSERT INTO feed_cache (key, value, stored_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind("stale")
        .bind(&b"2"[..])
        .bind(Utc::now().timestamp() - 7200)
        .bind(Utc::now().timestamp() - 1)
        .execute(&store.pool)
        .await
        .unwrap();

        assert_eq!(store.evict_expired().await.unwrap(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_close_is_clean() {
        let store = test_store().await;
        store.set("k", b"v", 60).await.unwrap();
        store.close().await;
        assert!(store.get("k").await.is_err(), "closed pool rejects queries");
    }
}
