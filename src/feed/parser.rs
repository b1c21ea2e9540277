use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while decoding a feed document.
///
/// There is no partial recovery: any of these fails the whole conversion.
#[derive(Debug, Error)]
pub enum ParseError {
    /// XML syntax error (mismatched tags, bad escapes, invalid names)
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The document ended with elements still open
    #[error("Feed document truncated inside <{0}>")]
    Truncated(String),

    /// Well-formed XML, but no `<channel>` under the root element
    #[error("Feed document has no <channel> element")]
    MissingChannel,
}

/// A parsed syndication feed: channel metadata plus its items in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub generator: String,
    pub web_master: String,
    pub language: String,
    /// Carried verbatim; never parsed as a date.
    pub last_build_date: String,
    /// Advisory only. The cache expires daily regardless.
    pub ttl: u32,
    pub items: Vec<Item>,
}

/// One feed entry. `description` is untrusted HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Item {
    pub title: String,
    pub description: String,
    pub link: String,
    pub guid: String,
    pub pub_date: String,
    /// First `<category>` of the item, empty when there is none.
    pub category: String,
    pub categories: Vec<String>,
}

/// HTML entities that show up unescaped in hand-written feeds.
///
/// Only the XML builtins and this fixed table are resolved; DOCTYPE-declared
/// entities never are.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    if let Some(builtin) = quick_xml::escape::resolve_predefined_entity(entity) {
        return Some(builtin);
    }
    Some(match entity {
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        _ => return None,
    })
}

/// Decodes raw feed bytes into a [`Feed`].
///
/// Reads `rss > channel` (and items placed next to the channel, as RSS 1.0
/// does). Elements are matched by their qualified name, so `atom:link` never
/// lands in `link`. Missing fields stay empty; a non-numeric `<ttl>` is 0.
///
/// # Errors
///
/// - [`ParseError::Xml`] - the document is not well-formed XML
/// - [`ParseError::Truncated`] - the document ends inside an element
/// - [`ParseError::MissingChannel`] - no `<channel>` directly under the root
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; only the
    // XML builtins and the fixed table above are resolved.
    let mut reader = Reader::from_reader(bytes);

    let mut feed = Feed::default();
    let mut found_channel = false;
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current_item: Option<(usize, Item)> = None;
    // Character data of the field being read. Only the field's own text is
    // kept; text of elements nested inside it is skipped.
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                stack.push(name);

                let depth = stack.len();
                let under_channel = depth == 3 && stack[1] == b"channel";
                match stack[depth - 1].as_slice() {
                    b"channel" if depth == 2 => found_channel = true,
                    b"item" if under_channel || depth == 2 => {
                        current_item = Some((depth, Item::default()));
                    }
                    _ => {}
                }
                if is_field_depth(&stack, &current_item) {
                    text.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                let depth = stack.len() + 1;
                let under_channel = depth == 3 && stack[1] == b"channel";
                match e.name().as_ref() {
                    b"channel" if depth == 2 => found_channel = true,
                    b"item" if under_channel || depth == 2 => feed.items.push(Item::default()),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let unescaped = e
                    .unescape_with(resolve_html_entity)
                    .map_err(|err| ParseError::Xml(err.to_string()))?;
                if is_field_depth(&stack, &current_item) {
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(e)) => {
                if is_field_depth(&stack, &current_item) {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(_)) => {
                let depth = stack.len();
                let is_field = is_field_depth(&stack, &current_item);
                let Some(name) = stack.pop() else {
                    return Err(ParseError::Xml("unexpected closing tag".to_string()));
                };

                let item_depth = current_item.as_ref().map(|(d, _)| *d);
                if item_depth == Some(depth) {
                    if let Some((_, item)) = current_item.take() {
                        feed.items.push(item);
                    }
                } else if is_field {
                    let value = take_trimmed(&mut text);
                    match current_item.as_mut() {
                        Some((_, item)) => assign_item_field(item, &name, value),
                        None => assign_channel_field(&mut feed, &name, value),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Truncated(
            String::from_utf8_lossy(open).into_owned(),
        ));
    }
    if !found_channel {
        return Err(ParseError::MissingChannel);
    }

    tracing::debug!(title = %feed.title, items = feed.items.len(), "Parsed feed");
    Ok(feed)
}

/// Whether the innermost open element is a channel or item field.
fn is_field_depth(stack: &[Vec<u8>], current_item: &Option<(usize, Item)>) -> bool {
    match current_item {
        Some((item_depth, _)) => stack.len() == item_depth + 1,
        None => stack.len() == 3 && stack[1] == b"channel",
    }
}

fn take_trimmed(text: &mut String) -> String {
    let value = text.trim().to_string();
    text.clear();
    value
}

fn assign_channel_field(feed: &mut Feed, name: &[u8], value: String) {
    match name {
        b"title" => feed.title = value,
        b"link" => feed.link = value,
        b"description" => feed.description = value,
        b"generator" => feed.generator = value,
        b"webMaster" => feed.web_master = value,
        b"language" => feed.language = value,
        b"lastBuildDate" => feed.last_build_date = value,
        b"ttl" => feed.ttl = value.trim().parse().unwrap_or(0),
        _ => {}
    }
}

fn assign_item_field(item: &mut Item, name: &[u8], value: String) {
    match name {
        b"title" => item.title = value,
        b"description" => item.description = value,
        b"link" => item.link = value,
        b"guid" => item.guid = value,
        b"pubDate" => item.pub_date = value,
        b"category" => {
            if item.categories.is_empty() {
                item.category = value.clone();
            }
            item.categories.push(value);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
    <title>Demo</title>
    <link>https://example.com/</link>
    <atom:link href="https://example.com/feed" rel="self"/>
    <description>A demo feed</description>
    <generator>hand</generator>
    <webMaster>ops@example.com</webMaster>
    <language>en-us</language>
    <lastBuildDate>Mon, 19 Oct 2026 10:00:00 +0000</lastBuildDate>
    <ttl>60</ttl>
    <image><title>Logo</title><url>https://example.com/logo.png</url></image>
    <item>
        <title>First</title>
        <description><![CDATA[<p>Hello <b>world</b></p>]]></description>
        <link>https://example.com/1</link>
        <guid isPermaLink="false">id-1</guid>
        <pubDate>Mon, 19 Oct 2026 09:00:00 +0000</pubDate>
        <category>news</category>
        <category>rust</category>
    </item>
    <item>
        <title>Second &amp; last</title>
        <description>&lt;p&gt;Escaped&amp;nbsp;markup&lt;/p&gt;</description>
        <link>https://example.com/2</link>
    </item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_channel_metadata() {
        let feed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(feed.title, "Demo");
        assert_eq!(feed.link, "https://example.com/");
        assert_eq!(feed.description, "A demo feed");
        assert_eq!(feed.generator, "hand");
        assert_eq!(feed.web_master, "ops@example.com");
        assert_eq!(feed.language, "en-us");
        assert_eq!(feed.last_build_date, "Mon, 19 Oct 2026 10:00:00 +0000");
        assert_eq!(feed.ttl, 60);
    }

    #[test]
    fn test_parse_items_in_order() {
        let feed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        let titles: Vec<_> = feed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second & last"]);
    }

    #[test]
    fn test_parse_item_fields() {
        let feed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        let first = &feed.items[0];
        assert_eq!(first.description, "<p>Hello <b>world</b></p>");
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(first.guid, "id-1");
        assert_eq!(first.pub_date, "Mon, 19 Oct 2026 09:00:00 +0000");
        assert_eq!(first.category, "news");
        assert_eq!(first.categories, vec!["news", "rust"]);
    }

    #[test]
    fn test_escaped_description_is_unescaped() {
        let feed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(feed.items[1].description, "<p>Escaped&nbsp;markup</p>");
    }

    #[test]
    fn test_namespaced_link_ignored() {
        let feed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(feed.link, "https://example.com/");
    }

    #[test]
    fn test_nested_title_does_not_override_channel_title() {
        let feed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(feed.title, "Demo");
    }

    #[test]
    fn test_missing_fields_default_empty() {
        let xml = r#"<rss><channel><item><title>Only title</title></item></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.title, "");
        assert_eq!(feed.ttl, 0);
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].link, "");
        assert_eq!(feed.items[0].category, "");
    }

    #[test]
    fn test_invalid_ttl_defaults_to_zero() {
        let xml = r#"<rss><channel><ttl>soon</ttl></channel></rss>"#;
        assert_eq!(parse_feed(xml.as_bytes()).unwrap().ttl, 0);
    }

    #[test]
    fn test_empty_channel() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert!(feed.items.is_empty());
    }

    #[test]
    fn test_rss1_items_beside_channel() {
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
            <channel><title>RDF</title></channel>
            <item><title>A</title></item>
            <item><title>B</title></item>
        </rdf:RDF>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.title, "RDF");
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[1].title, "B");
    }

    #[test]
    fn test_mismatched_tags_rejected() {
        let xml = r#"<rss><channel><title>x</channel></rss>"#;
        assert!(matches!(
            parse_feed(xml.as_bytes()),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn test_truncated_document_rejected() {
        let xml = r#"<rss><channel><item><title>x</title>"#;
        assert!(parse_feed(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"plain text, not a feed").is_err());
    }

    #[test]
    fn test_no_channel_rejected() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>Atom</title></feed>"#;
        assert!(matches!(
            parse_feed(xml.as_bytes()),
            Err(ParseError::MissingChannel)
        ));
    }

    #[test]
    fn test_field_keeps_text_around_inline_children() {
        let xml = r#"<rss><channel>
            <title>Hi <b>x</b> there</title>
            <item><title>
                Lead <em>skipped</em> tail
            </title></item>
        </channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.title, "Hi  there");
        assert_eq!(feed.items[0].title, "Lead  tail");
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let xml = r#"<rss><channel><title>&bogus;</title></channel></rss>"#;
        assert!(matches!(
            parse_feed(xml.as_bytes()),
            Err(ParseError::Xml(_))
        ));
    }
}
