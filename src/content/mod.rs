//! Item content processing.
//!
//! - [`dom`] - editable HTML tree and its XHTML serializer
//! - [`sanitize`] - allow-list sanitizer over that tree
//! - [`images`] - image re-encoding and per-conversion asset dedup

pub mod dom;
mod images;
mod sanitize;

pub use dom::Document;
pub use images::{
    asset_id, encode_jpeg, AssetError, AssetStore, CompressedAsset, ImageCompressor,
    DEFAULT_IMAGE_QUALITY, IMAGE_MEDIA_TYPE,
};
pub use sanitize::{
    is_allowed, sanitize_document, sanitize_html, SanitizeError, ALLOWED_TAGS, IMAGE_CLASS,
    MAX_MARKUP_BYTES,
};
