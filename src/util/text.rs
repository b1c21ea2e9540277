use std::borrow::Cow;

/// Longest slug produced by [`slugify`], in bytes.
const MAX_SLUG_LEN: usize = 48;

/// Strips characters that are not allowed in an XML 1.0 document.
///
/// Feed text and item markup end up inside XHTML content documents, where a
/// stray control character makes the whole document unreadable for strict
/// readers. Removes C0 controls except tab, newline and carriage return,
/// plus DEL and the noncharacters U+FFFE/U+FFFF.
///
/// Returns `Cow::Borrowed` when nothing needs removing (the common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_forbidden) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_forbidden(c)).collect())
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
        || c == '\u{fffe}'
        || c == '\u{ffff}'
}

/// Turns a page title into a file-name-safe slug.
///
/// Lowercases ASCII alphanumerics, collapses every other run of characters
/// into a single `-`, and caps the length. Titles with nothing usable
/// become `untitled`.
///
/// ```
/// use feedbook::util::slugify;
///
/// assert_eq!(slugify("Hello, World!"), "hello-world");
/// assert_eq!(slugify("¿¿??"), "untitled");
/// ```
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
            if slug.len() >= MAX_SLUG_LEN {
                break;
            }
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_is_borrowed() {
        let input = "Plain text\twith tab\nand newline";
        assert!(matches!(strip_control_chars(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_control_chars_removed() {
        assert_eq!(strip_control_chars("a\u{1}b\u{1b}c\u{7f}d"), "abcd");
    }

    #[test]
    fn test_noncharacters_removed() {
        assert_eq!(strip_control_chars("x\u{fffe}y\u{ffff}"), "xy");
    }

    #[test]
    fn test_unicode_preserved() {
        assert_eq!(strip_control_chars("日本語 – ok"), "日本語 – ok");
    }

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("The Quick Brown Fox"), "the-quick-brown-fox");
    }

    #[test]
    fn test_slugify_trims_separators() {
        assert_eq!(slugify("  --Rust 1.80 released!--  "), "rust-1-80-released");
    }

    #[test]
    fn test_slugify_empty() {
        assert_eq!(slugify(""), "untitled");
        assert_eq!(slugify("日本語"), "untitled");
    }

    #[test]
    fn test_slugify_caps_length() {
        let long = "word ".repeat(40);
        let slug = slugify(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }
}
