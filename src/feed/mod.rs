//! Feed acquisition: fetching, parsing and the daily read-through cache.
//!
//! - [`fetcher`] - single-shot HTTP GET with a hard deadline
//! - [`parser`] - RSS channel/item decoding with `quick-xml`
//! - [`cache`] - feed cache keyed by normalized URL, expiring at local midnight
//!
//! # Example
//!
//! ```ignore
//! use feedbook::feed::{FeedCache, Fetcher};
//! use feedbook::storage::MemoryStore;
//!
//! let cache = FeedCache::new(MemoryStore::default());
//! let fetcher = Fetcher::new(reqwest::Client::new());
//! let feed = cache.load(&fetcher, "example.com/rss").await?;
//! ```

mod cache;
mod fetcher;
mod parser;

use thiserror::Error;

pub use cache::{ttl_until_midnight, FeedCache};
pub use fetcher::{FetchError, Fetcher, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_TIMEOUT};
pub use parser::{parse_feed, Feed, Item, ParseError};

/// Failure to obtain a usable feed document.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}
