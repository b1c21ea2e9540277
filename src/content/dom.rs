//! Owned, mutable HTML tree.
//!
//! `scraper` gives us a tolerant HTML5 parse but no way to edit attributes,
//! so the parsed document is copied into an `ego_tree::Tree` of plain
//! element/text nodes. Removed nodes are detached and become unreachable
//! from the root; every walk starts at the root, so they never reappear.

use ego_tree::iter::Edge;
use ego_tree::{NodeId, Tree};
use scraper::{Html, Node};
use std::borrow::Cow;

use crate::util::strip_control_chars;

/// Elements serialized as `<name/>` with no closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomNode {
    Document,
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

impl ElementData {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    /// Appends `class` to the element's class list unless already present.
    pub fn add_class(&mut self, class: &str) {
        let current = self.attr("class").unwrap_or_default();
        if current.split_ascii_whitespace().any(|c| c == class) {
            return;
        }
        let joined = if current.trim().is_empty() {
            class.to_string()
        } else {
            format!("{} {}", current.trim(), class)
        };
        self.set_attr("class", joined);
    }
}

/// Elements whose first newline the HTML parser swallows.
const NEWLINE_ELIDING_ELEMENTS: &[&str] = &["pre", "textarea", "listing"];

/// A parsed HTML document whose structure and attributes can be edited.
#[derive(Debug, Clone)]
pub struct Document {
    tree: Tree<DomNode>,
}

impl Document {
    /// Parse `html` as a full document. Never fails: malformed markup is
    /// repaired the way browsers do, and `html`/`head`/`body` always exist.
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut tree = Tree::new(DomNode::Document);
        let root_id = tree.root().id();

        // Iterative copy; attacker-controlled nesting must not grow the stack
        let mut pending = vec![(parsed.tree.root(), root_id)];
        while let Some((source, target)) = pending.pop() {
            for child in source.children() {
                let node = match child.value() {
                    Node::Element(el) => {
                        let mut attrs: Vec<(String, String)> = el
                            .attrs()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect();
                        attrs.sort_by(|a, b| a.0.cmp(&b.0));
                        DomNode::Element(ElementData {
                            name: el.name().to_string(),
                            attrs,
                        })
                    }
                    Node::Text(text) => DomNode::Text(String::from(&**text)),
                    _ => continue,
                };
                let Some(mut parent) = tree.get_mut(target) else {
                    continue;
                };
                let id = parent.append(node).id();
                if child.has_children() {
                    pending.push((child, id));
                }
            }
        }

        Self { tree }
    }

    /// The `body` element.
    pub fn body(&self) -> Option<NodeId> {
        self.tree
            .root()
            .descendants()
            .find(|n| matches!(n.value(), DomNode::Element(el) if el.name == "body"))
            .map(|n| n.id())
    }

    /// Snapshot of every attached element, in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.elements_under(self.tree.root().id())
    }

    /// Snapshot of the attached elements below `id`, excluding `id` itself.
    pub fn elements_under(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.tree.get(id) else {
            return Vec::new();
        };
        node.descendants()
            .skip(1)
            .filter(|n| matches!(n.value(), DomNode::Element(_)))
            .map(|n| n.id())
            .collect()
    }

    /// Attached elements named `name` below the body.
    pub fn find_in_body(&self, name: &str) -> Vec<NodeId> {
        let Some(body) = self.body() else {
            return Vec::new();
        };
        self.elements_under(body)
            .into_iter()
            .filter(|id| self.element(*id).is_some_and(|el| el.name == name))
            .collect()
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.tree.get(id)?.value() {
            DomNode::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Run `f` on the element at `id`, if it is one.
    pub fn update_element(&mut self, id: NodeId, f: impl FnOnce(&mut ElementData)) {
        if let Some(mut node) = self.tree.get_mut(id) {
            if let DomNode::Element(el) = node.value() {
                f(el);
            }
        }
    }

    /// The element directly containing `id`, if its parent is an element.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.tree.get(id)?.parent()?;
        matches!(parent.value(), DomNode::Element(_)).then(|| parent.id())
    }

    /// Whether `id` still hangs off the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let root = self.tree.root().id();
        self.tree
            .get(id)
            .is_some_and(|n| n.ancestors().any(|a| a.id() == root))
    }

    /// Remove `id` together with its subtree.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(mut node) = self.tree.get_mut(id) {
            node.detach();
        }
    }

    /// Replace `id` by its children, keeping their order and position.
    pub fn unwrap(&mut self, id: NodeId) {
        let Some(node) = self.tree.get(id) else {
            return;
        };
        if node.parent().is_none() {
            return;
        }
        let children: Vec<NodeId> = node.children().map(|c| c.id()).collect();

        for child in children {
            if let Some(mut c) = self.tree.get_mut(child) {
                c.detach();
            }
            if let Some(mut wrapper) = self.tree.get_mut(id) {
                wrapper.insert_id_before(child);
            }
        }
        self.remove(id);
    }

    /// Serialize the children of the body as XHTML-compatible markup.
    pub fn body_xhtml(&self) -> String {
        self.body()
            .map(|body| self.inner_xhtml(body))
            .unwrap_or_default()
    }

    /// Serialize the whole document as `<html><head></head><body>…</body></html>`.
    ///
    /// Only body content is emitted; head content and attributes on the
    /// document-level elements are never part of an item's markup.
    pub fn to_html(&self) -> String {
        format!(
            "<html><head></head><body>{}</body></html>",
            self.body_xhtml()
        )
    }

    fn inner_xhtml(&self, id: NodeId) -> String {
        let mut out = String::new();
        let Some(container) = self.tree.get(id) else {
            return out;
        };

        for edge in container.traverse() {
            match edge {
                Edge::Open(node) if node.id() == id => {}
                Edge::Close(node) if node.id() == id => {}
                Edge::Open(node) => match node.value() {
                    DomNode::Element(el) => {
                        write_open_tag(&mut out, el);
                        // Re-parsing drops one leading newline, so emit a spare
                        let leads_with_newline = matches!(
                            node.first_child().map(|c| c.value()),
                            Some(DomNode::Text(t)) if t.starts_with('\n')
                        );
                        if leads_with_newline && NEWLINE_ELIDING_ELEMENTS.contains(&el.name.as_str()) {
                            out.push('\n');
                        }
                    }
                    DomNode::Text(text) => {
                        let clean = strip_control_chars(text);
                        out.push_str(&quick_xml::escape::escape(clean.as_ref()));
                    }
                    DomNode::Document => {}
                },
                Edge::Close(node) => {
                    if let DomNode::Element(el) = node.value() {
                        if !is_void(&el.name) {
                            out.push_str("</");
                            out.push_str(&el.name);
                            out.push('>');
                        }
                    }
                }
            }
        }
        out
    }
}

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

fn write_open_tag(out: &mut String, el: &ElementData) {
    out.push('<');
    out.push_str(&el.name);
    for (name, value) in &el.attrs {
        if !is_xml_attribute_name(name) {
            continue;
        }
        let value: Cow<'_, str> = strip_control_chars(value);
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&quick_xml::escape::escape(value.as_ref()));
        out.push('"');
    }
    if is_void(&el.name) {
        out.push_str("/>");
    } else {
        out.push('>');
    }
}

/// Attribute names that are also valid XML names, minus namespace
/// declarations which would clash with the XHTML wrapper.
fn is_xml_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    valid_start
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        && !name.starts_with("xmlns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_creates_body() {
        let doc = Document::parse("<p>hi</p>");
        assert!(doc.body().is_some());
        assert_eq!(doc.body_xhtml(), "<p>hi</p>");
    }

    #[test]
    fn test_void_elements_self_closed() {
        let doc = Document::parse("<p>a<br>b<img src=x></p>");
        assert_eq!(doc.body_xhtml(), r#"<p>a<br/>b<img src="x"/></p>"#);
    }

    #[test]
    fn test_text_and_attributes_escaped() {
        let doc = Document::parse(r#"<a href="/q?a=1&amp;b=2" title='say "hi"'>1 &lt; 2 &amp; 3</a>"#);
        assert_eq!(
            doc.body_xhtml(),
            r#"<a href="/q?a=1&amp;b=2" title="say &quot;hi&quot;">1 &lt; 2 &amp; 3</a>"#
        );
    }

    #[test]
    fn test_pre_leading_newline_survives_reparse() {
        // The parser eats the first newline after <pre>, leaving "\nx"
        let doc = Document::parse("<pre>\n\nx</pre>");
        let once = doc.body_xhtml();
        assert_eq!(once, "<pre>\n\nx</pre>");
        assert_eq!(Document::parse(&once).body_xhtml(), once);

        assert_eq!(Document::parse("<pre>\nx</pre>").body_xhtml(), "<pre>x</pre>");
        assert_eq!(Document::parse("<p>\nx</p>").body_xhtml(), "<p>\nx</p>");
    }

    #[test]
    fn test_comments_dropped() {
        let doc = Document::parse("<p>a<!-- secret -->b</p>");
        assert_eq!(doc.body_xhtml(), "<p>ab</p>");
    }

    #[test]
    fn test_invalid_attribute_names_dropped() {
        let doc = Document::parse(r#"<p 1bad="x" good-one="y" xmlns:evil="z">t</p>"#);
        assert_eq!(doc.body_xhtml(), r#"<p good-one="y">t</p>"#);
    }

    #[test]
    fn test_control_chars_stripped() {
        let doc = Document::parse("<p>a\u{1}b</p>");
        assert_eq!(doc.body_xhtml(), "<p>ab</p>");
    }

    #[test]
    fn test_unwrap_keeps_order_and_position() {
        let mut doc = Document::parse("<p>before</p><section><b>1</b>mid<i>2</i></section><p>after</p>");
        let section = doc.find_in_body("section")[0];
        doc.unwrap(section);
        assert_eq!(
            doc.body_xhtml(),
            "<p>before</p><b>1</b>mid<i>2</i><p>after</p>"
        );
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut doc = Document::parse("<p>keep</p><form><input name=x><b>gone</b></form>");
        let form = doc.find_in_body("form")[0];
        doc.remove(form);
        assert_eq!(doc.body_xhtml(), "<p>keep</p>");
        assert!(!doc.is_attached(form));
        assert!(doc.find_in_body("b").is_empty());
    }

    #[test]
    fn test_add_class_appends_once() {
        let mut el = ElementData {
            name: "img".to_string(),
            attrs: vec![("class".to_string(), "wide".to_string())],
        };
        el.add_class("image");
        el.add_class("image");
        assert_eq!(el.attr("class"), Some("wide image"));
    }

    #[test]
    fn test_to_html_wraps_body_only() {
        let doc = Document::parse("<title>t</title><p>x</p>");
        assert_eq!(doc.to_html(), "<html><head></head><body><p>x</p></body></html>");
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let html = "<span>".repeat(10_000) + "deep";
        let doc = Document::parse(&html);
        assert!(doc.body_xhtml().contains("deep"));
    }
}
