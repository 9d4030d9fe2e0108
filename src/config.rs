//! Configuration types for the textpress pipelines.
//!
//! Conversion and formatting behaviour is controlled through
//! [`FormatOptions`], built via its [`FormatOptionsBuilder`]. The smaller
//! [`ConvertOptions`] and [`RenderOptions`] are views of it handed to the
//! individual stages. All option structs serialise to JSON so the action
//! cache can fingerprint them.
//!
//! Publishing credentials live in [`crate::publish::PublishConfig`] because
//! they come from the environment, not from CLI flags.

use crate::error::TextpressError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default work directory holding the workspace, cache and logs.
pub const DEFAULT_WORK_DIR: &str = "./textpress";

/// Public URL prefix used when `TEXTPRESS_PUBLISH_ROOT` is not set.
pub const DEFAULT_PUBLISH_ROOT: &str = "https://texpr.com";

pub const ENV_API_ROOT: &str = "TEXTPRESS_API_ROOT";
pub const ENV_API_KEY: &str = "TEXTPRESS_API_KEY";
pub const ENV_PUBLISH_ROOT: &str = "TEXTPRESS_PUBLISH_ROOT";
pub const ENV_USERNAME: &str = "TEXTPRESS_USERNAME";

/// Backend used to turn a PDF into Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfConverter {
    /// `marker_single` from the marker-pdf project. Slower, better layout. (default)
    #[default]
    Marker,
    /// `markitdown` from Microsoft. Fast text extraction.
    Markitdown,
}

impl PdfConverter {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfConverter::Marker => "marker",
            PdfConverter::Markitdown => "markitdown",
        }
    }
}

impl fmt::Display for PdfConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PdfConverter {
    type Err = TextpressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "marker" => Ok(PdfConverter::Marker),
            "markitdown" => Ok(PdfConverter::Markitdown),
            other => Err(TextpressError::Config(format!(
                "unknown PDF converter '{other}' (expected 'marker' or 'markitdown')"
            ))),
        }
    }
}

/// Options for the conversion stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    pub pdf_converter: PdfConverter,
    /// Timeout for fetching URL inputs, in seconds. Default: 60.
    pub fetch_timeout_secs: u64,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            pdf_converter: PdfConverter::default(),
            fetch_timeout_secs: 60,
        }
    }
}

/// Options for the render stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Inject the document title as an `<h1>` at the top of the body.
    pub add_title: bool,
    /// Space-delimited CSS classes added to the `<body>` element.
    pub add_classes: Option<String>,
}

impl RenderOptions {
    /// The individual class names, validated.
    pub fn classes(&self) -> Result<Vec<&str>, TextpressError> {
        let Some(ref raw) = self.add_classes else {
            return Ok(Vec::new());
        };
        raw.split_whitespace()
            .map(|c| {
                if RE_CSS_CLASS.is_match(c) {
                    Ok(c)
                } else {
                    Err(TextpressError::InvalidInput {
                        operation: "render".to_string(),
                        detail: format!("'{c}' is not a valid CSS class name"),
                    })
                }
            })
            .collect()
    }
}

static RE_CSS_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_-][A-Za-z0-9_-]*$").unwrap());

/// Everything the `format` and `publish` actions need to know.
///
/// Built via [`FormatOptions::builder()`] or [`FormatOptions::default()`].
///
/// # Example
/// ```rust
/// use textpress::{FormatOptions, PdfConverter};
///
/// let options = FormatOptions::builder()
///     .add_title(true)
///     .add_classes("dark wide")
///     .pdf_converter(PdfConverter::Markitdown)
///     .build()
///     .unwrap();
/// assert!(!options.no_minify);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    pub render: RenderOptions,
    pub convert: ConvertOptions,
    /// Skip the HTML minification step.
    pub no_minify: bool,
}

impl FormatOptions {
    pub fn builder() -> FormatOptionsBuilder {
        FormatOptionsBuilder {
            options: Self::default(),
        }
    }
}

/// Builder for [`FormatOptions`].
#[derive(Debug)]
pub struct FormatOptionsBuilder {
    options: FormatOptions,
}

impl FormatOptionsBuilder {
    pub fn add_title(mut self, v: bool) -> Self {
        self.options.render.add_title = v;
        self
    }

    pub fn add_classes(mut self, classes: impl Into<String>) -> Self {
        let classes = classes.into();
        self.options.render.add_classes = if classes.trim().is_empty() {
            None
        } else {
            Some(classes)
        };
        self
    }

    pub fn no_minify(mut self, v: bool) -> Self {
        self.options.no_minify = v;
        self
    }

    pub fn pdf_converter(mut self, converter: PdfConverter) -> Self {
        self.options.convert.pdf_converter = converter;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.options.convert.fetch_timeout_secs = secs.max(1);
        self
    }

    /// Build the options, validating the CSS class list.
    pub fn build(self) -> Result<FormatOptions, TextpressError> {
        self.options.render.classes()?;
        Ok(self.options)
    }
}
