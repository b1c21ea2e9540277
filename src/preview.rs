//! View models for showing a feed before converting it.
//!
//! These are plain serializable structs; rendering them is up to the caller
//! (the CLI prints them as JSON).

use serde::Serialize;
use thiserror::Error;

use crate::book::header_block;
use crate::content::{sanitize_document, SanitizeError};
use crate::feed::Feed;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Item {index} does not exist (feed has {len} items)")]
    NotFound { index: usize, len: usize },

    #[error(transparent)]
    Sanitize(#[from] SanitizeError),
}

/// A feed with its items summarized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedListing {
    pub title: String,
    pub link: String,
    pub description: String,
    pub last_build_date: String,
    pub items: Vec<ListedItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedItem {
    /// Position in the feed; pass to [`preview_item`]
    pub index: usize,
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub categories: Vec<String>,
}

/// One item rendered the way it will appear in the book, minus image
/// embedding: `body` still references the original image URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemPreview {
    pub index: usize,
    pub feed_title: String,
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub body: String,
}

pub fn list_items(feed: &Feed) -> FeedListing {
    FeedListing {
        title: feed.title.clone(),
        link: feed.link.clone(),
        description: feed.description.clone(),
        last_build_date: feed.last_build_date.clone(),
        items: feed
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| ListedItem {
                index,
                title: item.title.clone(),
                link: item.link.clone(),
                pub_date: item.pub_date.clone(),
                categories: item.categories.clone(),
            })
            .collect(),
    }
}

/// Sanitized preview of the item at `index`.
///
/// # Errors
///
/// - [`PreviewError::NotFound`] if `index` is out of range
/// - [`PreviewError::Sanitize`] if the description is rejected
pub fn preview_item(feed: &Feed, index: usize) -> Result<ItemPreview, PreviewError> {
    let item = feed.items.get(index).ok_or(PreviewError::NotFound {
        index,
        len: feed.items.len(),
    })?;

    let doc = sanitize_document(&item.description)?;
    let mut body = header_block(item, &feed.last_build_date);
    body.push_str(&doc.body_xhtml());

    Ok(ItemPreview {
        index,
        feed_title: feed.title.clone(),
        title: item.title.clone(),
        link: item.link.clone(),
        pub_date: item.pub_date.clone(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Item;
    use pretty_assertions::assert_eq;

    fn sample_feed() -> Feed {
        Feed {
            title: "Demo".to_string(),
            link: "http://example.com/".to_string(),
            last_build_date: "Mon, 19 Oct 2026 08:00:00 GMT".to_string(),
            items: vec![
                Item {
                    title: "A".to_string(),
                    link: "http://example.com/a".to_string(),
                    description: "<div><p>alpha</p></div><script>x()</script>".to_string(),
                    categories: vec!["news".to_string(), "tech".to_string()],
                    ..Default::default()
                },
                Item {
                    title: "B".to_string(),
                    link: "http://example.com/b".to_string(),
                    description: "beta".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_list_items() {
        let listing = list_items(&sample_feed());
        assert_eq!(listing.title, "Demo");
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.items[0].index, 0);
        assert_eq!(listing.items[0].categories, vec!["news", "tech"]);
        assert_eq!(listing.items[1].title, "B");
    }

    #[test]
    fn test_listing_serializes() {
        let json = serde_json::to_value(list_items(&sample_feed())).unwrap();
        assert_eq!(json["items"][1]["link"], "http://example.com/b");
    }

    #[test]
    fn test_preview_item_sanitizes() {
        let preview = preview_item(&sample_feed(), 0).unwrap();
        assert_eq!(preview.feed_title, "Demo");
        assert!(preview.body.starts_with(r#"<div class="header"><h1>A</h1>"#));
        assert!(preview.body.ends_with("<p>alpha</p>"));
        assert!(!preview.body.contains("script"));
    }

    #[test]
    fn test_preview_out_of_range() {
        let err = preview_item(&sample_feed(), 5).unwrap_err();
        assert!(matches!(err, PreviewError::NotFound { index: 5, len: 2 }));
    }
}
