use chrono::{DateTime, Local, TimeZone};

use super::fetcher::Fetcher;
use super::parser::{parse_feed, Feed};
use super::FeedError;
use crate::storage::KeyValueStore;
use crate::util::normalize_feed_url;

const SECONDS_PER_DAY: i64 = 86_400;

/// Seconds from `now` until the next midnight in `now`'s timezone.
///
/// Always within `1..=86400`, so an entry written at any instant goes stale
/// at the end of that calendar day at the latest. A write at exactly
/// midnight lives for the whole day. Days longer than 24 hours (DST
/// fall-back) are capped at 86400.
pub fn ttl_until_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> u32 {
    let tz = now.timezone();
    let secs = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.signed_duration_since(now).num_seconds())
        .unwrap_or(SECONDS_PER_DAY);

    secs.clamp(1, SECONDS_PER_DAY) as u32
}

/// Read-through cache of raw feed bytes, keyed by normalized feed URL.
///
/// Every backend failure is absorbed here: a failed read counts as a miss
/// and a failed write is logged, so the cache can never fail a conversion.
pub struct FeedCache<S> {
    store: S,
}

impl<S: KeyValueStore> FeedCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Cached bytes for `key`, or `None` on a miss or backend error.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(Some(bytes)) => {
                tracing::debug!(key = %key, "Cache hit");
                Some(bytes)
            }
            Ok(None) => {
                tracing::debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store `bytes` until the end of the current local day.
    pub async fn set(&self, key: &str, bytes: &[u8]) {
        self.set_at(key, bytes, &Local::now()).await;
    }

    async fn set_at<Tz: TimeZone>(&self, key: &str, bytes: &[u8], now: &DateTime<Tz>) {
        let ttl = ttl_until_midnight(now);
        if let Err(e) = self.store.set(key, bytes, ttl).await {
            tracing::warn!(key = %key, error = %e, "Cache write failed, continuing without cache");
        } else {
            tracing::debug!(key = %key, ttl_secs = ttl, "Cached feed");
        }
    }

    /// Load and parse the feed at `url`, consulting the cache first.
    ///
    /// On a miss the feed is fetched once, parsed, and only then written
    /// back, so an unparseable document is never cached. Cached bytes that
    /// no longer parse are treated like a miss.
    ///
    /// # Errors
    ///
    /// [`FeedError::Fetch`] or [`FeedError::Parse`] from the fresh fetch.
    pub async fn load(&self, fetcher: &Fetcher, url: &str) -> Result<Feed, FeedError> {
        let key = normalize_feed_url(url);

        if let Some(bytes) = self.get(&key).await {
            match parse_feed(&bytes) {
                Ok(feed) => return Ok(feed),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cached feed does not parse, refetching");
                }
            }
        }

        let bytes = fetcher.fetch(&key).await?;
        let feed = parse_feed(&bytes)?;
        self.set(&key, &bytes).await;
        Ok(feed)
    }
}
