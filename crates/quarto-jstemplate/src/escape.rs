/*
 * escape.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! HTML escaping used by `<%- ... %>` regions.

/// Escape the characters that are significant in HTML text and attributes.
///
/// `&`, `<`, `>`, `"`, `'` and `` ` `` are replaced by entities; all other
/// characters pass through unchanged.
pub fn escape_html(text: &str) -> String {
    if !text.contains(['&', '<', '>', '"', '\'', '`']) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
        );
        assert_eq!(escape_html("`cmd`"), "&#x60;cmd&#x60;");
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(escape_html("plain text é"), "plain text é");
        assert_eq!(escape_html(""), "");
    }

    #[test]
    fn test_escaping_is_not_idempotent() {
        assert_eq!(escape_html("&amp;"), "&amp;amp;");
    }
}
