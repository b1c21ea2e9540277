//! Reduces untrusted item markup to a fixed, safe HTML subset.
//!
//! The work happens in two passes, each of which snapshots the element set
//! before it starts mutating:
//!
//! 1. unwrap: every `div` that directly contains an element is dissolved
//!    into its parent, and `class` is stripped everywhere. Repeated until no
//!    such `div` remains.
//! 2. allow-list: every element under `body` whose tag is not in
//!    [`ALLOWED_TAGS`] is removed together with its subtree.
//!
//! Finally every surviving `img` is tagged with class `image`.
//!
//! Unwrapping can leave nesting the HTML parser would not build itself, such
//! as an `h2` directly inside an `h1`. The result is therefore re-parsed and
//! cleaned again until its serialization stops changing, which makes
//! sanitizing its own output a no-op.

use std::collections::HashSet;

use thiserror::Error;

use super::dom::Document;

/// Largest description accepted, in bytes.
pub const MAX_MARKUP_BYTES: usize = 2 * 1024 * 1024;

/// Tags allowed to survive sanitization.
pub const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "address", "article", "b", "blockquote", "body", "br", "cite", "code", "em",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header", "hr",
    "html", "i", "img", "li", "link", "main", "nav", "ol", "p", "picture", "pre", "section",
    "source", "span", "strong", "table", "tbody", "td", "th", "thead", "time", "title", "tr", "ul",
];

/// Upper bound on clean/re-parse rounds. Parser restructuring settles after
/// one or two.
const MAX_SETTLE_ROUNDS: usize = 8;

/// Class given to every image left in sanitized output.
pub const IMAGE_CLASS: &str = "image";

#[derive(Debug, Error)]
pub enum SanitizeError {
    /// Markup exceeds [`MAX_MARKUP_BYTES`]
    #[error("Markup too large: {0} bytes (limit {MAX_MARKUP_BYTES})")]
    TooLarge(usize),

    /// Parsed document has no body element
    #[error("Markup has no body element")]
    MissingBody,
}

/// Sanitize `html` and serialize the result as a full document.
///
/// # Errors
///
/// See [`sanitize_document`].
pub fn sanitize_html(html: &str) -> Result<String, SanitizeError> {
    Ok(sanitize_document(html)?.to_html())
}

/// Sanitize `html`, returning the editable tree.
///
/// # Errors
///
/// - [`SanitizeError::TooLarge`] if the input exceeds [`MAX_MARKUP_BYTES`]
/// - [`SanitizeError::MissingBody`] if parsing produced no body
pub fn sanitize_document(html: &str) -> Result<Document, SanitizeError> {
    if html.len() > MAX_MARKUP_BYTES {
        return Err(SanitizeError::TooLarge(html.len()));
    }

    let mut doc = clean(html)?;
    let mut markup = doc.to_html();
    for _ in 0..MAX_SETTLE_ROUNDS {
        let next = clean(&markup)?;
        let next_markup = next.to_html();
        if next_markup == markup {
            return Ok(doc);
        }
        doc = next;
        markup = next_markup;
    }

    tracing::debug!(rounds = MAX_SETTLE_ROUNDS, "Sanitized markup did not settle");
    Ok(doc)
}

fn clean(html: &str) -> Result<Document, SanitizeError> {
    let mut doc = Document::parse(html);
    unwrap_divs(&mut doc);
    remove_disallowed(&mut doc)?;
    tag_images(&mut doc);
    Ok(doc)
}

pub fn is_allowed(tag: &str) -> bool {
    ALLOWED_TAGS.contains(&tag)
}

fn unwrap_divs(doc: &mut Document) {
    loop {
        let snapshot = doc.elements();

        let mut seen = HashSet::new();
        let mut wrappers = Vec::new();
        for &id in &snapshot {
            if let Some(parent) = doc.parent_element(id) {
                let is_div = doc.element(parent).is_some_and(|el| el.name == "div");
                if is_div && seen.insert(parent) {
                    wrappers.push(parent);
                }
            }
        }

        for &id in &snapshot {
            doc.update_element(id, |el| el.remove_attr("class"));
        }

        if wrappers.is_empty() {
            break;
        }
        for div in wrappers {
            doc.unwrap(div);
        }
    }
}

fn remove_disallowed(doc: &mut Document) -> Result<(), SanitizeError> {
    let body = doc.body().ok_or(SanitizeError::MissingBody)?;

    let snapshot = doc.elements_under(body);
    let mut removed = 0usize;
    for id in snapshot {
        let allowed = doc.element(id).is_some_and(|el| is_allowed(&el.name));
        if !allowed {
            doc.remove(id);
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::trace!(removed, "Removed disallowed elements");
    }
    Ok(())
}

fn tag_images(doc: &mut Document) {
    for id in doc.find_in_body("img") {
        doc.update_element(id, |el| el.add_class(IMAGE_CLASS));
    }
}
