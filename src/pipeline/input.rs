//! Input resolution: turn a user-supplied path or URL into an [`Item`].
//!
//! Local files are checked for existence and read permission up front so
//! callers get `FileNotFound` / `PermissionDenied` instead of a converter
//! failure deep in the pipeline. Binary formats are sniffed by magic bytes
//! (`PK` for `.docx`, `%PDF` for PDF). Text formats are read into the item
//! body; binary ones are referenced through `external_path`.
//!
//! URLs are not fetched here. They become URL resources and the converter
//! calls [`fetch_url`] when (and if) it needs the page.

use crate::error::{Result, TextpressError};
use crate::item::{Format, Item, ItemType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to an input item.
pub fn prepare_input(input: &str) -> Result<Item> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TextpressError::InvalidInput {
            operation: "input".to_string(),
            detail: "no input path or URL given".to_string(),
        });
    }
    if is_url(input) {
        debug!(url = input, "Input is a URL resource");
        return Ok(Item::url_resource(input));
    }
    resolve_local(Path::new(input))
}

fn resolve_local(path: &Path) -> Result<Item> {
    if !path.exists() {
        return Err(TextpressError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    if path.is_dir() {
        return Err(TextpressError::InvalidInput {
            operation: "input".to_string(),
            detail: format!("'{}' is a directory, not a document", path.display()),
        });
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let format = Format::from_extension(&ext).ok_or_else(|| TextpressError::UnsupportedInput {
        item_type: "file".to_string(),
        format: if ext.is_empty() {
            "(no extension)".to_string()
        } else {
            ext.clone()
        },
    })?;

    let item = if format.is_binary() {
        check_magic(path, format)?;
        Item::file_resource(format, path)
    } else {
        let body = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => TextpressError::InvalidInput {
                operation: "input".to_string(),
                detail: format!("'{}' is not valid UTF-8 text", path.display()),
            },
            _ => TextpressError::io(path, e),
        })?;
        let mut item = Item::text(ItemType::Doc, format, body);
        item.derived_from = Some(path.display().to_string());
        item
    };

    debug!(path = %path.display(), format = %format, "Resolved local input");
    Ok(item)
}

/// Verify a binary file starts with the signature its extension promises.
fn check_magic(path: &Path, format: Format) -> Result<()> {
    let expected: &[u8] = match format {
        Format::Docx => b"PK",
        Format::Pdf => b"%PDF",
        _ => return Ok(()),
    };
    let mut file = std::fs::File::open(path).map_err(|e| TextpressError::io(path, e))?;
    let mut magic = vec![0u8; expected.len()];
    if file.read_exact(&mut magic).is_err() || magic != expected {
        return Err(TextpressError::InvalidInput {
            operation: "input".to_string(),
            detail: format!(
                "'{}' does not look like a {} file (bad signature)",
                path.display(),
                format
            ),
        });
    }
    Ok(())
}

/// A fetched web page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub html: String,
    /// Contents of the page's `<title>`, if any.
    pub title: Option<String>,
}

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

/// Download a web page as HTML text.
pub async fn fetch_url(url: &str, timeout_secs: u64) -> Result<FetchedPage> {
    info!("Fetching: {}", url);

    let failed = |reason: String| TextpressError::FetchFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("textpress/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if content_type.contains("application/pdf") {
        return Err(failed(
            "URL points to a PDF; download it and pass the file path instead".to_string(),
        ));
    }

    let html = response.text().await.map_err(|e| failed(e.to_string()))?;
    let title = page_title(&html);
    debug!(bytes = html.len(), title = ?title, "Fetched page");
    Ok(FetchedPage { html, title })
}

fn page_title(html: &str) -> Option<String> {
    RE_TITLE
        .captures(html)
        .map(|c| c[1].split_whitespace().collect::<Vec<_>>().join(" "))
        .map(|t| {
            t.replace("&amp;", "&")
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&#39;", "'")
        })
        .filter(|t| !t.is_empty())
}

/// Where an input came from, for log messages.
pub fn display_input(item: &Item) -> String {
    item.url
        .clone()
        .or_else(|| item.external_path.as_ref().map(|p| p.display().to_string()))
        .or_else(|| item.derived_from.clone())
        .unwrap_or_else(|| "(inline)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/post"));
        assert!(is_url("http://example.com/post"));
        assert!(!is_url("/tmp/doc.md"));
        assert!(!is_url("doc.md"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_becomes_url_resource() {
        let item = prepare_input("https://example.com/post").unwrap();
        assert_eq!(item.item_type, ItemType::Resource);
        assert_eq!(item.format, Format::Url);
        assert_eq!(item.url.as_deref(), Some("https://example.com/post"));
    }

    #[test]
    fn markdown_file_is_read_into_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "# Hello\n\nWorld").unwrap();
        let item = prepare_input(path.to_str().unwrap()).unwrap();
        assert_eq!(item.item_type, ItemType::Doc);
        assert_eq!(item.format, Format::Markdown);
        assert_eq!(item.body.as_deref(), Some("# Hello\n\nWorld"));
        assert!(item.validate().is_ok());
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = prepare_input("/definitely/not/here.md").unwrap_err();
        assert!(matches!(err, TextpressError::FileNotFound { .. }));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, b"\x89PNG").unwrap();
        let err = prepare_input(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, TextpressError::UnsupportedInput { .. }), "got: {err}");
    }

    #[test]
    fn fake_docx_fails_signature_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = prepare_input(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("bad signature"), "got: {err}");
    }

    #[test]
    fn docx_becomes_file_resource() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        std::fs::write(&path, b"PK\x03\x04rest").unwrap();
        let item = prepare_input(path.to_str().unwrap()).unwrap();
        assert_eq!(item.format, Format::Docx);
        assert_eq!(item.external_path.as_deref(), Some(path.as_path()));
        assert!(item.body.is_none());
    }

    #[test]
    fn title_is_extracted_and_unescaped() {
        let html = "<html><head><title>\n  Rust &amp; Friends \n</title></head></html>";
        assert_eq!(page_title(html).as_deref(), Some("Rust & Friends"));
        assert_eq!(page_title("<p>none</p>"), None);
    }
}
