//! Turns an RSS feed into a self-contained EPUB.
//!
//! The pipeline: [`feed`] fetches and caches the raw document and parses it,
//! [`content`] sanitizes each item's markup and re-encodes its images,
//! [`book`] builds one page per item and serializes the archive.
//! [`pipeline::Converter`] wires these together.

pub mod book;
pub mod config;
pub mod content;
pub mod feed;
pub mod pipeline;
pub mod preview;
pub mod storage;
pub mod util;
