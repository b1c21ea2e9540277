//! Book production: per-item pages and the EPUB container around them.
//!
//! - [`page`] - concurrent, order-preserving page building
//! - [`archive`] - EPUB 3 serialization

mod archive;
mod page;

pub use archive::{
    load_stylesheet, page_file_name, BuildError, EpubBuilder, DEFAULT_STYLESHEET, EPUB_MEDIA_TYPE,
};
pub use page::{build_page, header_block, Page, PageBuilder};
