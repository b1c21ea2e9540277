//! Feed-to-book conversion: cache → fetch → parse → pages → archive.

use std::time::Duration;
use thiserror::Error;

use crate::book::{load_stylesheet, BuildError, EpubBuilder, PageBuilder};
use crate::config::Config;
use crate::content::ImageCompressor;
use crate::feed::{Feed, FeedCache, FeedError, FetchError, Fetcher, ParseError};
use crate::storage::KeyValueStore;

/// Failure of a whole conversion. Per-image and cache problems never get
/// this far; they are logged where they happen.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// The configured overall deadline elapsed
    #[error("Conversion timed out after {0:?}")]
    Timeout(Duration),
}

impl From<FeedError> for ConvertError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Fetch(e) => Self::Fetch(e),
            FeedError::Parse(e) => Self::Parse(e),
        }
    }
}

/// Everything one conversion needs, injected once and reused per request.
pub struct Converter<S> {
    fetcher: Fetcher,
    cache: FeedCache<S>,
    pages: PageBuilder,
    epub: EpubBuilder,
    deadline: Option<Duration>,
}

impl<S: KeyValueStore> Converter<S> {
    /// Converter with default image quality, no concurrency cap and the
    /// built-in stylesheet.
    pub fn new(fetcher: Fetcher, store: S) -> Self {
        Self {
            pages: PageBuilder::new(ImageCompressor::new(fetcher.clone())),
            cache: FeedCache::new(store),
            epub: EpubBuilder::new(),
            deadline: None,
            fetcher,
        }
    }

    /// Converter tuned by `config`, sharing `client` for every request.
    pub fn from_config(client: reqwest::Client, store: S, config: &Config) -> Self {
        let fetcher = Fetcher::new(client)
            .with_timeout(config.fetch_timeout())
            .with_max_response_bytes(config.max_response_bytes)
            .allow_private_hosts(config.allow_private_hosts);

        let compressor = ImageCompressor::new(fetcher.clone()).with_quality(config.image_quality);
        let mut epub = EpubBuilder::new();
        if let Some(path) = &config.stylesheet {
            epub = epub.with_stylesheet(load_stylesheet(path));
        }

        Self {
            pages: PageBuilder::new(compressor).with_max_concurrent(config.max_concurrent_pages),
            cache: FeedCache::new(store),
            epub,
            deadline: config.conversion_timeout(),
            fetcher,
        }
    }

    pub fn with_page_builder(mut self, pages: PageBuilder) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_epub_builder(mut self, epub: EpubBuilder) -> Self {
        self.epub = epub;
        self
    }

    /// Bound [`Converter::convert`] as a whole. `None` leaves only the
    /// per-request deadlines.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn cache(&self) -> &FeedCache<S> {
        &self.cache
    }

    /// The parsed feed at `url`, from cache when possible.
    pub async fn feed(&self, url: &str) -> Result<Feed, ConvertError> {
        Ok(self.cache.load(&self.fetcher, url).await?)
    }

    /// Build an EPUB from an already parsed feed.
    ///
    /// Items that fail to sanitize are left out; only archive serialization
    /// can fail.
    pub async fn build_archive(&self, feed: &Feed) -> Result<Vec<u8>, BuildError> {
        let pages = self.pages.build_pages(feed).await;
        self.epub.build(feed, &pages)
    }

    /// Fetch (or reuse) the feed at `url` and turn it into EPUB bytes.
    ///
    /// Dropping the returned future cancels every in-flight fetch.
    pub async fn convert(&self, url: &str) -> Result<Vec<u8>, ConvertError> {
        let run = async {
            let feed = self.feed(url).await?;
            tracing::info!(url = %url, title = %feed.title, items = feed.items.len(), "Converting feed");
            Ok::<_, ConvertError>(self.build_archive(&feed).await?)
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, run)
                .await
                .map_err(|_| ConvertError::Timeout(deadline))?,
            None => run.await,
        }
    }
}
