//! Utility functions for common operations.
//!
//! - **URL handling**: feed URL normalization, SSRF-aware validation and
//!   relative reference resolution
//! - **Text processing**: XML-safe character filtering and slugs for archive
//!   file names

mod text;
mod url_validator;

pub use text::{slugify, strip_control_chars};
pub use url_validator::{normalize_feed_url, resolve_reference, validate_url, UrlValidationError};
