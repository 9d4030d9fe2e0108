//! HTML minification via `minify-html`.
//!
//! Closing tags and the `<html>`/`<head>` opening tags are kept so the page
//! stays readable by strict parsers and publishing backends. Inline CSS and
//! JS are minified too.

use crate::error::{Result, TextpressError};
use crate::item::{Format, Item};
use minify_html::{minify, Cfg};
use tracing::debug;

fn config() -> Cfg {
    Cfg {
        keep_closing_tags: true,
        keep_html_and_head_opening_tags: true,
        minify_css: true,
        minify_js: true,
        ..Cfg::default()
    }
}

/// Minify an HTML string. Never returns something longer than the input.
pub fn minify_html_str(html: &str) -> Result<String> {
    let minified = minify(html.as_bytes(), &config());
    let minified = String::from_utf8(minified)
        .map_err(|e| TextpressError::stage("minify", format!("minifier produced invalid UTF-8: {e}")))?;
    if minified.len() > html.len() {
        return Ok(html.to_string());
    }
    Ok(minified)
}

/// Minify a rendered HTML item.
pub fn minify_item(item: &Item) -> Result<Item> {
    if item.format != Format::Html {
        return Err(TextpressError::InvalidInput {
            operation: "minify".to_string(),
            detail: format!("expected an html item, got '{}'", item.format),
        });
    }
    let before = item.body_str();
    let after = minify_html_str(before)?;
    debug!(
        before = before.len(),
        after = after.len(),
        "Minified HTML"
    );
    Ok(item.derived_copy().with_body(after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemType;

    #[test]
    fn whitespace_between_tags_is_removed() {
        let html = "<!DOCTYPE html>\n<html>\n<head>\n<title>T</title>\n</head>\n<body>\n  <h1>Hello</h1>\n\n  <p>World</p>\n</body>\n</html>\n";
        let out = minify_html_str(html).unwrap();
        assert!(out.len() < html.len());
        assert!(out.contains("<h1>Hello</h1><p>World</p>"), "got: {out}");
        assert!(out.contains("</p>"), "closing tags kept: {out}");
        assert!(!out.contains(">\n"), "got: {out}");
    }

    #[test]
    fn css_is_minified() {
        let html = "<html><head><style>\n  body {\n    color: red;\n  }\n</style></head><body></body></html>";
        let out = minify_html_str(html).unwrap();
        assert!(out.contains("body{color:red}"), "got: {out}");
    }

    #[test]
    fn minify_item_keeps_metadata() {
        let item = Item::text(ItemType::Export, Format::Html, "<p>  a  </p>\n\n")
            .with_title(Some("T".into()));
        let out = minify_item(&item).unwrap();
        assert_eq!(out.title.as_deref(), Some("T"));
        assert_eq!(out.format, Format::Html);
        assert!(out.body_str().len() <= item.body_str().len());
    }

    #[test]
    fn non_html_is_rejected() {
        let item = Item::text(ItemType::Export, Format::Markdown, "# x");
        assert!(minify_item(&item).is_err());
    }
}
