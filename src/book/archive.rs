//! EPUB 3 assembly.
//!
//! Layout of the produced archive:
//!
//! ```text
//! mimetype                  (stored, first entry)
//! META-INF/container.xml
//! OEBPS/content.opf         metadata, manifest, spine
//! OEBPS/nav.xhtml           table of contents, first in reading order
//! OEBPS/toc.ncx             EPUB 2 navigation for older readers
//! OEBPS/styles.css
//! OEBPS/text/NNN-slug.xhtml one per page
//! OEBPS/images/<id>.jpg     one per distinct asset
//! ```

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::page::Page;
use crate::content::CompressedAsset;
use crate::feed::Feed;
use crate::util::{slugify, strip_control_chars};

/// Content type of the produced archive.
pub const EPUB_MEDIA_TYPE: &str = "application/epub+zip";

/// Stylesheet used when none is configured.
pub const DEFAULT_STYLESHEET: &str = include_str!("../../assets/styles.css");

const TOC_TITLE: &str = "Table of Contents";
const UNTITLED: &str = "Untitled";
const DEFAULT_LANGUAGE: &str = "en";

const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
const OPS_NS: &str = "http://www.idpf.org/2007/ops";
const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

#[derive(Debug, Error)]
pub enum BuildError {
    /// Writing an archive entry failed
    #[error("Archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing an XML document failed
    #[error("XML write failed: {0}")]
    Xml(String),

    /// An asset's payload is not valid base64
    #[error("Asset {id} has invalid data: {source}")]
    Asset {
        id: String,
        source: base64::DecodeError,
    },
}

/// Archive-relative file name of a page, unique per index.
pub fn page_file_name(page: &Page) -> String {
    format!("{:03}-{}.xhtml", page.index, slugify(&page.title))
}

/// Read a stylesheet from `path`, falling back to [`DEFAULT_STYLESHEET`].
pub fn load_stylesheet(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(css) => css,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read stylesheet, using default"
            );
            DEFAULT_STYLESHEET.to_string()
        }
    }
}

/// Serializes a feed's pages into EPUB bytes.
#[derive(Debug, Clone)]
pub struct EpubBuilder {
    stylesheet: String,
    modified: Option<DateTime<Utc>>,
}

impl Default for EpubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EpubBuilder {
    pub fn new() -> Self {
        Self {
            stylesheet: DEFAULT_STYLESHEET.to_string(),
            modified: None,
        }
    }

    pub fn with_stylesheet(mut self, css: impl Into<String>) -> Self {
        self.stylesheet = css.into();
        self
    }

    /// Fix the `dcterms:modified` timestamp instead of using the build time.
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Assemble the archive. Pages appear in the order given.
    ///
    /// # Errors
    ///
    /// Any [`BuildError`]; nothing is returned on failure.
    pub fn build(&self, feed: &Feed, pages: &[Page]) -> Result<Vec<u8>, BuildError> {
        let book = BookInfo::new(feed, self.modified.unwrap_or_else(Utc::now));
        let entries: Vec<(String, &Page)> = pages.iter().map(|p| (page_file_name(p), p)).collect();

        let mut assets: BTreeMap<&str, &Arc<CompressedAsset>> = BTreeMap::new();
        for page in pages {
            for asset in &page.assets {
                assets.entry(asset.id.as_str()).or_insert(asset);
            }
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(EPUB_MEDIA_TYPE.as_bytes())?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(&container_xml()?)?;

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(&package_opf(&book, &entries, &assets)?)?;

        zip.start_file("OEBPS/nav.xhtml", deflated)?;
        zip.write_all(&nav_xhtml(&book, &entries)?)?;

        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(&toc_ncx(&book, &entries)?)?;

        zip.start_file("OEBPS/styles.css", deflated)?;
        zip.write_all(self.stylesheet.as_bytes())?;

        for (file_name, page) in &entries {
            zip.start_file(format!("OEBPS/text/{file_name}"), deflated)?;
            zip.write_all(&page_xhtml(&book, page)?)?;
        }

        // Already compressed
        for asset in assets.values() {
            let bytes = asset.decode().map_err(|source| BuildError::Asset {
                id: asset.id.clone(),
                source,
            })?;
            zip.start_file(format!("OEBPS/{}", asset.path()), stored)?;
            zip.write_all(&bytes)?;
        }

        let bytes = zip.finish()?.into_inner();
        tracing::info!(
            title = %book.title,
            pages = entries.len(),
            images = assets.len(),
            bytes = bytes.len(),
            "Built EPUB"
        );
        Ok(bytes)
    }
}

/// Book-level metadata derived from the feed.
struct BookInfo {
    identifier: String,
    title: String,
    language: String,
    description: String,
    creator: String,
    modified: String,
}

impl BookInfo {
    fn new(feed: &Feed, modified: DateTime<Utc>) -> Self {
        let seed = if feed.link.is_empty() { &feed.title } else { &feed.link };
        let digest = Sha256::digest(seed.as_bytes());
        let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();

        Self {
            identifier: format!("urn:feedbook:{hex}"),
            title: non_empty(&feed.title, UNTITLED),
            language: non_empty(&feed.language, DEFAULT_LANGUAGE),
            description: feed.description.trim().to_string(),
            creator: feed.web_master.trim().to_string(),
            modified: modified.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

fn non_empty(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn page_title(page: &Page) -> String {
    non_empty(&page.title, UNTITLED)
}

// ============================================================================
// XML documents
// ============================================================================

/// Thin wrapper over `quick_xml::Writer` mapping errors to [`BuildError`].
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Result<Self, BuildError> {
        let mut out = Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(out)
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), BuildError> {
        self.writer
            .write_event(event)
            .map_err(|e| BuildError::Xml(e.to_string()))
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), BuildError> {
        let mut element = BytesStart::new(name);
        for &attr in attrs {
            element.push_attribute(attr);
        }
        self.event(Event::Start(element))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), BuildError> {
        let mut element = BytesStart::new(name);
        for &attr in attrs {
            element.push_attribute(attr);
        }
        self.event(Event::Empty(element))
    }

    fn end(&mut self, name: &str) -> Result<(), BuildError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), BuildError> {
        self.start(name, attrs)?;
        let clean = strip_control_chars(text);
        self.event(Event::Text(BytesText::new(clean.as_ref())))?;
        self.end(name)
    }

    /// Write already-escaped markup verbatim.
    fn raw(&mut self, markup: &str) -> Result<(), BuildError> {
        self.event(Event::Text(BytesText::from_escaped(markup)))
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

fn container_xml() -> Result<Vec<u8>, BuildError> {
    let mut xml = XmlOut::new()?;
    xml.start(
        "container",
        &[
            ("version", "1.0"),
            ("xmlns", "urn:oasis:names:tc:opendocument:xmlns:container"),
        ],
    )?;
    xml.start("rootfiles", &[])?;
    xml.empty(
        "rootfile",
        &[
            ("full-path", "OEBPS/content.opf"),
            ("media-type", "application/oebps-package+xml"),
        ],
    )?;
    xml.end("rootfiles")?;
    xml.end("container")?;
    Ok(xml.finish())
}

fn package_opf(
    book: &BookInfo,
    entries: &[(String, &Page)],
    assets: &BTreeMap<&str, &Arc<CompressedAsset>>,
) -> Result<Vec<u8>, BuildError> {
    let mut xml = XmlOut::new()?;
    xml.start(
        "package",
        &[
            ("xmlns", "http://www.idpf.org/2007/opf"),
            ("version", "3.0"),
            ("unique-identifier", "book-id"),
            ("xml:lang", book.language.as_str()),
        ],
    )?;

    xml.start("metadata", &[("xmlns:dc", "http://purl.org/dc/elements/1.1/")])?;
    xml.text_element("dc:identifier", &[("id", "book-id")], &book.identifier)?;
    xml.text_element("dc:title", &[], &book.title)?;
    xml.text_element("dc:language", &[], &book.language)?;
    if !book.creator.is_empty() {
        xml.text_element("dc:creator", &[], &book.creator)?;
    }
    if !book.description.is_empty() {
        xml.text_element("dc:description", &[], &book.description)?;
    }
    xml.text_element("meta", &[("property", "dcterms:modified")], &book.modified)?;
    xml.end("metadata")?;

    xml.start("manifest", &[])?;
    xml.empty(
        "item",
        &[
            ("id", "nav"),
            ("href", "nav.xhtml"),
            ("media-type", XHTML_MEDIA_TYPE),
            ("properties", "nav"),
        ],
    )?;
    xml.empty(
        "item",
        &[
            ("id", "ncx"),
            ("href", "toc.ncx"),
            ("media-type", "application/x-dtbncx+xml"),
        ],
    )?;
    xml.empty(
        "item",
        &[("id", "css"), ("href", "styles.css"), ("media-type", "text/css")],
    )?;
    for (file_name, page) in entries {
        let id = page_id(page);
        let href = format!("text/{file_name}");
        xml.empty(
            "item",
            &[("id", id.as_str()), ("href", href.as_str()), ("media-type", XHTML_MEDIA_TYPE)],
        )?;
    }
    for asset in assets.values() {
        let id = format!("img-{}", asset.id);
        let href = asset.path();
        xml.empty(
            "item",
            &[("id", id.as_str()), ("href", href.as_str()), ("media-type", asset.media_type)],
        )?;
    }
    xml.end("manifest")?;

    xml.start("spine", &[("toc", "ncx")])?;
    xml.empty("itemref", &[("idref", "nav")])?;
    for (_, page) in entries {
        xml.empty("itemref", &[("idref", page_id(page).as_str())])?;
    }
    xml.end("spine")?;

    xml.end("package")?;
    Ok(xml.finish())
}

fn page_id(page: &Page) -> String {
    format!("page-{:03}", page.index)
}

fn xhtml_head(xml: &mut XmlOut, book: &BookInfo, title: &str, css_href: &str) -> Result<(), BuildError> {
    xml.event(Event::DocType(BytesText::from_escaped("html")))?;
    xml.start(
        "html",
        &[
            ("xmlns", XHTML_NS),
            ("xmlns:epub", OPS_NS),
            ("xml:lang", book.language.as_str()),
            ("lang", book.language.as_str()),
        ],
    )?;
    xml.start("head", &[])?;
    xml.empty("meta", &[("charset", "utf-8")])?;
    xml.text_element("title", &[], title)?;
    xml.empty(
        "link",
        &[("rel", "stylesheet"), ("type", "text/css"), ("href", css_href)],
    )?;
    xml.end("head")
}

fn nav_xhtml(book: &BookInfo, entries: &[(String, &Page)]) -> Result<Vec<u8>, BuildError> {
    let mut xml = XmlOut::new()?;
    xhtml_head(&mut xml, book, TOC_TITLE, "styles.css")?;

    xml.start("body", &[])?;
    xml.start("nav", &[("epub:type", "toc"), ("id", "toc")])?;
    xml.text_element("h1", &[], TOC_TITLE)?;
    xml.start("ol", &[])?;
    for (file_name, page) in entries {
        let href = format!("text/{file_name}");
        xml.start("li", &[("class", "item")])?;
        xml.text_element("a", &[("href", href.as_str())], &page_title(page))?;
        xml.end("li")?;
    }
    xml.end("ol")?;
    xml.end("nav")?;
    xml.end("body")?;

    xml.end("html")?;
    Ok(xml.finish())
}

fn toc_ncx(book: &BookInfo, entries: &[(String, &Page)]) -> Result<Vec<u8>, BuildError> {
    let mut xml = XmlOut::new()?;
    xml.start(
        "ncx",
        &[
            ("xmlns", "http://www.daisy.org/z3986/2005/ncx/"),
            ("version", "2005-1"),
        ],
    )?;

    xml.start("head", &[])?;
    xml.empty("meta", &[("name", "dtb:uid"), ("content", book.identifier.as_str())])?;
    xml.end("head")?;

    xml.start("docTitle", &[])?;
    xml.text_element("text", &[], &book.title)?;
    xml.end("docTitle")?;

    xml.start("navMap", &[])?;
    for (order, (file_name, page)) in entries.iter().enumerate() {
        let id = format!("nav-{:03}", page.index);
        let play_order = (order + 1).to_string();
        let src = format!("text/{file_name}");

        xml.start("navPoint", &[("id", id.as_str()), ("playOrder", play_order.as_str())])?;
        xml.start("navLabel", &[])?;
        xml.text_element("text", &[], &page_title(page))?;
        xml.end("navLabel")?;
        xml.empty("content", &[("src", src.as_str())])?;
        xml.end("navPoint")?;
    }
    xml.end("navMap")?;

    xml.end("ncx")?;
    Ok(xml.finish())
}

fn page_xhtml(book: &BookInfo, page: &Page) -> Result<Vec<u8>, BuildError> {
    let mut xml = XmlOut::new()?;
    xhtml_head(&mut xml, book, &page_title(page), "../styles.css")?;
    xml.start("body", &[])?;
    xml.raw(&page.body)?;
    xml.end("body")?;
    xml.end("html")?;
    Ok(xml.finish())
}
