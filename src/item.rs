//! The document item: the unit of work flowing through every pipeline.
//!
//! Items are values. A stage never mutates its input; it calls
//! [`Item::derived_copy`] and overrides the fields it changes with the
//! consuming `with_*` setters. The copy inherits title, type and format,
//! forgets where the predecessor was stored, and records it as provenance.

use crate::error::{Result, TextpressError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What role an item plays in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Raw input: a file or URL as supplied by the user.
    Resource,
    /// A text document read from disk (Markdown, plain text, HTML).
    Doc,
    /// A derived output of an action.
    Export,
    /// Bookkeeping data such as a publish manifest.
    Config,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Resource => "resource",
            ItemType::Doc => "doc",
            ItemType::Export => "export",
            ItemType::Config => "config",
        }
    }

    /// Directory (relative to the store root) holding items of this type.
    pub fn store_dir(&self) -> &'static str {
        match self {
            ItemType::Resource => "resources",
            ItemType::Doc => "docs",
            ItemType::Export => "exports",
            ItemType::Config => "configs",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared content format of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Plaintext,
    Markdown,
    Html,
    Docx,
    Pdf,
    Url,
    Json,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Plaintext => "plaintext",
            Format::Markdown => "markdown",
            Format::Html => "html",
            Format::Docx => "docx",
            Format::Pdf => "pdf",
            Format::Url => "url",
            Format::Json => "json",
        }
    }

    /// File extension used when an item of this format is stored.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Plaintext => "txt",
            Format::Markdown => "md",
            Format::Html => "html",
            Format::Docx => "docx",
            Format::Pdf => "pdf",
            Format::Url => "url.yml",
            Format::Json => "json",
        }
    }

    /// Text formats carry their payload in `body`.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            Format::Plaintext | Format::Markdown | Format::Html | Format::Json
        )
    }

    /// Binary formats carry their payload in `external_path`.
    pub fn is_binary(&self) -> bool {
        matches!(self, Format::Docx | Format::Pdf)
    }

    /// Guess a format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" | "mdown" => Some(Format::Markdown),
            "txt" | "text" => Some(Format::Plaintext),
            "html" | "htm" | "xhtml" => Some(Format::Html),
            "docx" => Some(Format::Docx),
            "pdf" => Some(Format::Pdf),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_type: ItemType,
    pub format: Format,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Location relative to the workspace store root, once saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// Where this item came from: a predecessor's store path, a source
    /// file path or a URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
}

impl Item {
    /// A text item with the given body.
    pub fn text(item_type: ItemType, format: Format, body: impl Into<String>) -> Self {
        Self {
            item_type,
            format,
            title: None,
            body: Some(body.into()),
            external_path: None,
            url: None,
            store_path: None,
            derived_from: None,
        }
    }

    /// A file-backed resource (docx, pdf).
    pub fn file_resource(format: Format, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
            .filter(|s| !s.trim().is_empty());
        Self {
            item_type: ItemType::Resource,
            format,
            title,
            body: None,
            derived_from: Some(path.display().to_string()),
            external_path: Some(path),
            url: None,
            store_path: None,
        }
    }

    /// A URL resource.
    pub fn url_resource(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            item_type: ItemType::Resource,
            format: Format::Url,
            title: None,
            body: None,
            external_path: None,
            derived_from: Some(url.clone()),
            url: Some(url),
            store_path: None,
        }
    }

    /// A new item inheriting everything but the store location, with this
    /// item recorded as its provenance.
    pub fn derived_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.derived_from = self
            .store_path
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| self.derived_from.clone());
        copy.store_path = None;
        copy
    }

    pub fn with_type(mut self, item_type: ItemType) -> Self {
        self.item_type = item_type;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    /// Set a text body. Clears any file-backed payload so the item stays
    /// consistent with a text format.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.external_path = None;
        self
    }

    /// Set a file-backed payload. Clears any text body.
    pub fn with_external_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.external_path = Some(path.into());
        self.body = None;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Body text, or an empty string for items without one.
    pub fn body_str(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Check that the payload matches the declared format.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.format.is_text() && self.body.is_none() {
            Some(format!("{} item has no body", self.format))
        } else if self.format.is_binary() && self.external_path.is_none() {
            Some(format!("{} item has no external path", self.format))
        } else if self.format == Format::Url && self.url.is_none() {
            Some("url item has no url".to_string())
        } else {
            None
        };
        match problem {
            Some(detail) => Err(TextpressError::InvalidInput {
                operation: "item".to_string(),
                detail,
            }),
            None => Ok(()),
        }
    }

    /// Text of the first ATX heading in the body, if any.
    pub fn body_heading(&self) -> Option<String> {
        let body = self.body.as_deref()?;
        if self.format == Format::Html {
            return RE_HTML_HEADING
                .captures(body)
                .map(|c| strip_tags(&c[1]).trim().to_string())
                .filter(|t| !t.is_empty());
        }
        body.lines()
            .filter_map(|line| RE_ATX_HEADING.captures(line))
            .map(|c| c[1].trim().trim_end_matches('#').trim().to_string())
            .find(|t| !t.is_empty())
    }

    /// Title, falling back to the first heading in the body.
    pub fn title_or_heading(&self) -> Option<String> {
        self.title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.body_heading())
    }

    /// Short title for logs and file names.
    pub fn abbrev_title(&self, max_len: usize) -> String {
        let title = self
            .title_or_heading()
            .unwrap_or_else(|| "untitled".to_string());
        if title.chars().count() <= max_len {
            title
        } else {
            let cut: String = title.chars().take(max_len.saturating_sub(1)).collect();
            format!("{}…", cut.trim_end())
        }
    }

    /// Filesystem-safe slug derived from the title.
    pub fn slug(&self) -> String {
        slugify(&self.abbrev_title(64))
    }

    /// Default file name when this item is stored.
    pub fn default_file_name(&self) -> String {
        format!("{}.{}", self.slug(), self.format.extension())
    }

    /// Path of the file holding this item's content, if it lives on disk.
    pub fn content_path(&self, store_root: &Path) -> Option<PathBuf> {
        if let Some(ref p) = self.external_path {
            return Some(p.clone());
        }
        self.store_path.as_ref().map(|p| store_root.join(p))
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} \"{}\"",
            self.item_type,
            self.format,
            self.abbrev_title(40)
        )?;
        if let Some(ref p) = self.store_path {
            write!(f, " at {}", p.display())?;
        }
        Ok(())
    }
}

static RE_ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}#{1,6}[ \t]+(.+?)\s*$").unwrap());
static RE_HTML_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[1-6][^>]*>(.*?)</h[1-6]>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

fn strip_tags(s: &str) -> String {
    RE_TAG.replace_all(s, "").to_string()
}

/// Lowercase, ASCII-only, underscore-separated slug.
pub fn slugify(s: &str) -> String {
    let lowered = s.to_lowercase();
    let slug = RE_NON_SLUG.replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}
