//! Conversion entry points: any supported input → a Markdown item.
//!
//! [`convert_item`] dispatches on [`classify`](crate::precondition::classify)
//! and returns a new `export`/`markdown` item derived from its input. The
//! title carries over from the input, or is taken from the first heading of
//! the converted body.
//!
//! | kind        | delegate                         | cleanup                 |
//! |-------------|----------------------------------|-------------------------|
//! | docx        | [`docx::read_docx`]              | [`cleanup::docx_cleanups`] |
//! | pdf         | [`pdf::pdf_to_markdown`]         | [`cleanup::clean_markdown`] |
//! | url         | [`input::fetch_url`] + html2md   | [`cleanup::clean_markdown`] |
//! | html        | [`html::html_to_markdown`]       | [`cleanup::clean_markdown`] |
//! | plain text  | body as-is                       | [`cleanup::clean_markdown`] |

use crate::config::ConvertOptions;
use crate::error::{Result, TextpressError};
use crate::item::{Format, Item, ItemType};
use crate::pipeline::{cleanup, docx, html, input, pdf};
use crate::precondition::{classify, ContentKind};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert an item to clean Markdown.
///
/// # Errors
/// - `InvalidInput` when the item matches no known content kind; raised
///   before any conversion work
/// - `FetchFailed` for unreachable URLs
/// - `ConverterUnavailable` when the PDF tool is not installed
/// - `StageFailed { stage: "convert", .. }` when a delegate fails
pub async fn convert_item(item: &Item, options: &ConvertOptions) -> Result<Item> {
    let start = Instant::now();
    let kind = classify(item);
    debug!(kind = %kind, item = %item, "Classified input");

    let mut fetched_title = None;
    let markdown = match kind {
        ContentKind::Docx => {
            let path = binary_path(item)?;
            let content = docx::read_docx(path).await?;
            debug!(notes = content.notes.len(), "Applying docx cleanups");
            cleanup::docx_cleanups(&content.markdown, &content.notes)
        }
        ContentKind::Pdf => {
            warn!(
                "PDF conversion is less reliable than .docx or HTML; \
                 check the output and prefer a .docx export of the source if you have one"
            );
            let path = binary_path(item)?;
            let md = pdf::pdf_to_markdown(path, options.pdf_converter).await?;
            cleanup::clean_markdown(&md)
        }
        ContentKind::Url => {
            let url = item.url.as_deref().unwrap_or_default();
            let page = input::fetch_url(url, options.fetch_timeout_secs).await?;
            fetched_title = page.title;
            cleanup::clean_markdown(&html::html_to_markdown(&page.html))
        }
        ContentKind::Html => cleanup::clean_markdown(&html::html_to_markdown(item.body_str())),
        ContentKind::PlainText => cleanup::clean_markdown(item.body_str()),
        ContentKind::Unsupported => {
            return Err(TextpressError::InvalidInput {
                operation: "convert".to_string(),
                detail: format!(
                    "don't know how to convert item of type '{}' and format '{}'",
                    item.item_type, item.format
                ),
            })
        }
    };

    let converted = item
        .derived_copy()
        .with_type(ItemType::Export)
        .with_format(Format::Markdown)
        .with_body(markdown);
    let title = item
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or(fetched_title)
        .or_else(|| converted.body_heading());
    let converted = converted.with_title(title);

    info!(
        kind = %kind,
        title = %converted.abbrev_title(60),
        chars = converted.body_str().len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Converted to Markdown"
    );
    Ok(converted)
}

/// Resolve `input` (path or URL) and convert it.
pub async fn convert_input(input_str: impl AsRef<str>, options: &ConvertOptions) -> Result<Item> {
    let item = input::prepare_input(input_str.as_ref())?;
    convert_item(&item, options).await
}

/// Synchronous wrapper around [`convert_input`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(input_str: impl AsRef<str>, options: &ConvertOptions) -> Result<Item> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TextpressError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_input(input_str, options))
}

fn binary_path(item: &Item) -> Result<&std::path::Path> {
    item.external_path
        .as_deref()
        .ok_or_else(|| TextpressError::InvalidInput {
            operation: "convert".to_string(),
            detail: format!("{} item has no file path", item.format),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::docx::tests::{build_docx, document, endnote_ref, endnotes, para, run};

    #[tokio::test]
    async fn plain_text_passes_through_with_heading_title() {
        let item = Item::text(ItemType::Doc, Format::Markdown, "# Hello\r\n\r\n\r\nWorld  ");
        let out = convert_item(&item, &ConvertOptions::default()).await.unwrap();
        assert_eq!(out.body.as_deref(), Some("# Hello\n\nWorld\n"));
        assert_eq!(out.title.as_deref(), Some("Hello"));
        assert_eq!(out.item_type, ItemType::Export);
        assert_eq!(out.format, Format::Markdown);
    }

    #[tokio::test]
    async fn explicit_title_wins_over_heading() {
        let item = Item::text(ItemType::Doc, Format::Plaintext, "# Heading\n")
            .with_title(Some("Given".into()));
        let out = convert_item(&item, &ConvertOptions::default()).await.unwrap();
        assert_eq!(out.title.as_deref(), Some("Given"));
    }

    #[tokio::test]
    async fn html_fragment_is_converted() {
        let item = Item::text(ItemType::Doc, Format::Html, "<h1>News</h1><p>Body <em>text</em>.</p>");
        let out = convert_item(&item, &ConvertOptions::default()).await.unwrap();
        assert!(out.body_str().starts_with("# News"), "got: {}", out.body_str());
        assert_eq!(out.title.as_deref(), Some("News"));
    }

    #[tokio::test]
    async fn unsupported_is_invalid_input() {
        let item = Item::text(ItemType::Config, Format::Json, "{}");
        let err = convert_item(&item, &ConvertOptions::default()).await.unwrap_err();
        match err {
            TextpressError::InvalidInput { operation, detail } => {
                assert_eq!(operation, "convert");
                assert!(detail.contains("'config'"), "got: {detail}");
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn docx_endnotes_become_footnotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gemini_report.docx");
        let body = [
            para(Some("Title"), &run("Research Report")),
            para(None, &format!("{}{}", run("Fact one."), endnote_ref(2))),
            para(None, &format!("{}{}", run("Fact two."), endnote_ref(3))),
            para(Some("Heading4"), &run("Works cited")),
        ]
        .concat();
        std::fs::write(
            &path,
            build_docx(&[
                ("word/document.xml", document(&body)),
                ("word/endnotes.xml", endnotes(&[(2, "Alpha."), (3, "Beta.")])),
            ]),
        )
        .unwrap();

        let item = Item::file_resource(Format::Docx, &path);
        let out = convert_item(&item, &ConvertOptions::default()).await.unwrap();
        let md = out.body_str();
        assert!(md.contains("Fact one.[^1]"), "got: {md}");
        assert!(md.contains("Fact two.[^2]"), "got: {md}");
        assert!(md.contains("\n## Works Cited\n"), "got: {md}");
        assert!(md.ends_with("[^1]: Alpha.\n[^2]: Beta.\n"), "got: {md}");
        // File stem title is kept over the body heading.
        assert_eq!(out.title.as_deref(), Some("gemini report"));
        assert_eq!(out.derived_from.as_deref(), Some(path.display().to_string().as_str()));
    }

    #[tokio::test]
    async fn adjacent_docx_endnotes_keep_their_own_footnotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.docx");
        let body = [
            para(None, &format!("{}{}{}", run("Claim."), endnote_ref(2), endnote_ref(3))),
            para(
                None,
                &format!("{}{}{}{}", run("More."), endnote_ref(4), endnote_ref(5), endnote_ref(6)),
            ),
        ]
        .concat();
        std::fs::write(
            &path,
            build_docx(&[
                ("word/document.xml", document(&body)),
                (
                    "word/endnotes.xml",
                    endnotes(&[(2, "Alpha"), (3, "Beta"), (4, "Gamma"), (5, "Delta"), (6, "Epsilon")]),
                ),
            ]),
        )
        .unwrap();

        let item = Item::file_resource(Format::Docx, &path);
        let out = convert_item(&item, &ConvertOptions::default()).await.unwrap();
        let md = out.body_str();
        assert!(md.contains("Claim.[^1][^2]"), "got: {md}");
        assert!(md.contains("More.[^3][^4][^5]"), "got: {md}");
        assert!(!md.contains("[^12]") && !md.contains("[^345]"), "got: {md}");
        assert!(
            md.ends_with("[^1]: Alpha\n[^2]: Beta\n[^3]: Gamma\n[^4]: Delta\n[^5]: Epsilon\n"),
            "got: {md}"
        );
    }

    #[test]
    fn convert_sync_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "just text").unwrap();
        let out = convert_sync(path.to_str().unwrap(), &ConvertOptions::default()).unwrap();
        assert_eq!(out.body.as_deref(), Some("just text\n"));
        assert_eq!(out.title, None);
    }
}
