//! Markdown → full HTML page.
//!
//! Markdown goes through comrak with the GFM extensions a published report
//! needs (tables, footnotes, strikethrough, autolinks, task lists). Raw HTML
//! in the Markdown is passed through, since converted documents carry
//! `<sup>` and `<br>` tags. The rendered fragment is wrapped in a fixed
//! page template with an embedded stylesheet so the output is a single
//! self-contained file.

use crate::config::RenderOptions;
use crate::error::{Result, TextpressError};
use crate::item::{Format, Item, ItemType};
use comrak::{markdown_to_html, Options};
use tracing::debug;

/// Title used when neither the item nor its body provides one.
pub const UNTITLED: &str = "Untitled";

const PAGE_CSS: &str = r#"
:root { --fg: #1d1d1f; --muted: #6e6e73; --bg: #fff; --rule: #e5e5ea; --link: #0a58ca; }
* { box-sizing: border-box; }
body { margin: 0; background: var(--bg); color: var(--fg); font: 17px/1.6 Georgia, "Times New Roman", serif; }
article.textpress { max-width: 44rem; margin: 0 auto; padding: 2.5rem 1.25rem 4rem; }
h1, h2, h3, h4, h5, h6 { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; line-height: 1.25; margin: 2rem 0 0.75rem; }
h1 { font-size: 2rem; } h2 { font-size: 1.5rem; } h3 { font-size: 1.2rem; }
a { color: var(--link); text-decoration-thickness: 1px; text-underline-offset: 2px; }
blockquote { margin: 1.5rem 0; padding: 0 1rem; border-left: 3px solid var(--rule); color: var(--muted); }
pre, code { font-family: ui-monospace, Menlo, Consolas, monospace; font-size: 0.9em; }
pre { overflow-x: auto; padding: 1rem; background: #f6f8fa; border-radius: 6px; }
table { border-collapse: collapse; width: 100%; margin: 1.5rem 0; font-size: 0.95em; }
th, td { border: 1px solid var(--rule); padding: 0.4rem 0.6rem; text-align: left; vertical-align: top; }
th { background: #f6f8fa; }
img { max-width: 100%; }
hr { border: 0; border-top: 1px solid var(--rule); margin: 2rem 0; }
sup { line-height: 0; }
.footnotes { margin-top: 3rem; font-size: 0.9em; color: var(--muted); }
"#;

/// Render Markdown to an HTML fragment.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.extension.footnotes = true;
    options.render.r#unsafe = true; // converted documents carry <sup> and <br>

    markdown_to_html(markdown, &options)
}

/// Render a Markdown, plain-text or HTML-fragment item as a complete page.
pub fn render_page(item: &Item, options: &RenderOptions) -> Result<Item> {
    let classes = options.classes()?;
    let content = match item.format {
        Format::Markdown | Format::Plaintext => render_markdown(item.body_str()),
        Format::Html => item.body_str().to_string(),
        other => {
            return Err(TextpressError::InvalidInput {
                operation: "render".to_string(),
                detail: format!("cannot render an item of format '{other}'"),
            })
        }
    };

    let title = item
        .title_or_heading()
        .unwrap_or_else(|| UNTITLED.to_string());
    let heading = if options.add_title {
        format!("<h1>{}</h1>\n", html_escape(&title))
    } else {
        String::new()
    };
    let body_class = if classes.is_empty() {
        String::new()
    } else {
        format!(r#" class="{}""#, classes.join(" "))
    };

    let page = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{css}</style>
</head>
<body{body_class}>
<article class="textpress">
{heading}{content}
</article>
</body>
</html>
"#,
        title = html_escape(&title),
        css = PAGE_CSS.trim(),
        body_class = body_class,
        heading = heading,
        content = content.trim_end(),
    );
    debug!(title = %title, bytes = page.len(), "Rendered page");

    Ok(item
        .derived_copy()
        .with_type(ItemType::Export)
        .with_format(Format::Html)
        .with_title(Some(title))
        .with_body(page))
}

/// Escape text for use in HTML content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormatOptions;

    fn md(body: &str) -> Item {
        Item::text(ItemType::Export, Format::Markdown, body)
    }

    #[test]
    fn renders_full_page_around_markdown() {
        let page = render_page(&md("# Hello\n\nWorld"), &RenderOptions::default()).unwrap();
        let html = page.body_str();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Hello</title>"));
        assert!(html.contains("<h1>Hello</h1>"));
        assert!(html.contains("<p>World</p>"));
        assert!(html.contains("<body>"));
        assert_eq!(page.format, Format::Html);
        assert_eq!(page.item_type, ItemType::Export);
        assert_eq!(page.title.as_deref(), Some("Hello"));
    }

    #[test]
    fn add_title_and_classes() {
        let options = FormatOptions::builder()
            .add_title(true)
            .add_classes("dark wide")
            .build()
            .unwrap()
            .render;
        let item = md("Body text.").with_title(Some("Q&A <draft>".into()));
        let html = render_page(&item, &options).unwrap().body.unwrap();
        assert!(html.contains(r#"<body class="dark wide">"#));
        assert!(html.contains("<h1>Q&amp;A &lt;draft&gt;</h1>"));
        assert!(html.contains("<title>Q&amp;A &lt;draft&gt;</title>"));
    }

    #[test]
    fn invalid_class_is_rejected() {
        let options = RenderOptions {
            add_title: false,
            add_classes: Some("ok \"><script>".into()),
        };
        assert!(render_page(&md("x"), &options).is_err());
    }

    #[test]
    fn footnotes_and_tables_render() {
        let body = "Claim.[^1]\n\n| a | b |\n| --- | --- |\n| 1 | 2 |\n\n[^1]: Source.\n";
        let html = render_markdown(body);
        assert!(html.contains("<table>"), "got: {html}");
        assert!(html.contains("footnote"), "got: {html}");
        assert!(html.contains("Source."), "got: {html}");
    }

    #[test]
    fn html_fragment_is_embedded_verbatim() {
        let item = Item::text(ItemType::Doc, Format::Html, "<section><p>Hi</p></section>");
        let html = render_page(&item, &RenderOptions::default()).unwrap().body.unwrap();
        assert!(html.contains("<section><p>Hi</p></section>"));
        assert!(html.contains("<title>Untitled</title>"));
    }

    #[test]
    fn deterministic() {
        let a = render_page(&md("# A\n\ntext"), &RenderOptions::default()).unwrap();
        let b = render_page(&md("# A\n\ntext"), &RenderOptions::default()).unwrap();
        assert_eq!(a.body, b.body);
    }

    #[test]
    fn docx_item_cannot_be_rendered() {
        let item = Item::file_resource(Format::Docx, "/tmp/x.docx");
        assert!(render_page(&item, &RenderOptions::default()).is_err());
    }
}
