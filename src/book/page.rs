use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::content::{sanitize_document, AssetStore, CompressedAsset, ImageCompressor, SanitizeError};
use crate::feed::{Feed, Item};
use crate::util::{resolve_reference, strip_control_chars};

/// Elements that only point at remote resources and cannot be rewritten.
const EXTERNAL_REFERENCES: &[&str] = &["source", "link"];

/// One finished section of the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Position of the source item in the feed
    pub index: usize,
    pub title: String,
    /// XHTML body content: header block followed by the sanitized description
    pub body: String,
    /// Distinct assets referenced by `body`
    pub assets: Vec<Arc<CompressedAsset>>,
}

/// Turns feed items into pages, one task per item.
#[derive(Clone)]
pub struct PageBuilder {
    compressor: ImageCompressor,
    max_concurrent: usize,
}

impl PageBuilder {
    pub fn new(compressor: ImageCompressor) -> Self {
        Self {
            compressor,
            max_concurrent: 0,
        }
    }

    /// Cap the number of items processed at once; `0` means no cap.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Build a page for every item of `feed`, in item order.
    ///
    /// Items whose description cannot be sanitized, or whose task panics,
    /// are logged and left out; the rest are unaffected. Images are shared
    /// between pages through one [`AssetStore`].
    pub async fn build_pages(&self, feed: &Feed) -> Vec<Page> {
        let assets = Arc::new(AssetStore::new(self.compressor.clone()));
        let limiter = (self.max_concurrent > 0).then(|| Arc::new(Semaphore::new(self.max_concurrent)));
        let last_build_date: Arc<str> = Arc::from(feed.last_build_date.as_str());

        let mut tasks = JoinSet::new();
        for (index, item) in feed.items.iter().cloned().enumerate() {
            let assets = Arc::clone(&assets);
            let limiter = limiter.clone();
            let last_build_date = Arc::clone(&last_build_date);

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let result = build_page(index, &item, &last_build_date, &assets).await;
                (index, item.title, result)
            });
        }

        let mut slots: Vec<Option<Page>> = (0..feed.items.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(page))) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(page);
                    }
                }
                Ok((index, title, Err(e))) => {
                    tracing::warn!(index, title = %title, error = %e, "Dropping page");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Page task failed");
                }
            }
        }

        let pages: Vec<Page> = slots.into_iter().flatten().collect();
        tracing::debug!(
            items = feed.items.len(),
            pages = pages.len(),
            "Built pages"
        );
        pages
    }
}

/// Sanitize one item and embed its images.
///
/// # Errors
///
/// [`SanitizeError`] from the description. Image failures only remove the
/// affected `img`.
pub async fn build_page(
    index: usize,
    item: &Item,
    last_build_date: &str,
    assets: &AssetStore,
) -> Result<Page, SanitizeError> {
    let mut doc = sanitize_document(&item.description)?;

    for name in EXTERNAL_REFERENCES {
        for id in doc.find_in_body(name) {
            doc.remove(id);
        }
    }

    let images = doc.find_in_body("img");
    let sources: Vec<Option<String>> = images
        .iter()
        .map(|&id| {
            doc.element(id)
                .and_then(|el| el.attr("src"))
                .and_then(|src| resolve_reference(src, &item.link))
        })
        .collect();

    let resolved = join_all(sources.iter().map(|source| async move {
        match source {
            Some(url) => assets.resolve(url).await,
            None => None,
        }
    }))
    .await;

    let mut used: Vec<Arc<CompressedAsset>> = Vec::new();
    for (id, asset) in images.into_iter().zip(resolved) {
        match asset {
            Some(asset) => {
                let src = format!("../{}", asset.path());
                doc.update_element(id, |el| {
                    el.set_attr("src", src);
                    el.remove_attr("srcset");
                });
                if !used.iter().any(|a| a.id == asset.id) {
                    used.push(asset);
                }
            }
            None => doc.remove(id),
        }
    }

    let mut body = header_block(item, last_build_date);
    body.push_str(&doc.body_xhtml());

    Ok(Page {
        index,
        title: item.title.clone(),
        body,
        assets: used,
    })
}

/// Header shown above every item: title, feed build date and a link back.
pub fn header_block(item: &Item, last_build_date: &str) -> String {
    let title = escape(&item.title);
    format!(
        concat!(
            r#"<div class="header"><h1>{title}</h1>"#,
            r#"<p class="header-item"><span class="last-build-date">{date}</span></p>"#,
            r#"<p class="header-item"><a href="{link}">{title}</a></p>"#,
            r#"<div class="bar strong"></div></div>"#,
        ),
        title = title,
        date = escape(last_build_date),
        link = escape(&item.link),
    )
}

fn escape(text: &str) -> String {
    quick_xml::escape::escape(strip_control_chars(text).as_ref()).into_owned()
}
