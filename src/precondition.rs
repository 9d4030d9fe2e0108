//! Content classification and composable admission checks.
//!
//! Every action declares which items it accepts as a single [`Precondition`]
//! built from the named predicates below with `&`, `|` and `!`:
//!
//! ```rust
//! use textpress::precondition::*;
//!
//! let accepts = (is_docx_resource() | has_html_body() | has_simple_text_body())
//!     & !has_fullpage_html_body();
//! assert_eq!(
//!     accepts.name(),
//!     "(is_docx_resource | has_html_body | has_simple_text_body) & !has_fullpage_html_body"
//! );
//! ```
//!
//! Predicates only look at declared metadata (type, format, which payload
//! field is set). The one exception is [`has_fullpage_html_body`], which
//! peeks at the start of an HTML body to tell a finished page from a
//! fragment.

use crate::error::{Result, TextpressError};
use crate::item::{Format, Item, ItemType};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

/// Which pipeline branch an item takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Docx,
    Url,
    Html,
    PlainText,
    Pdf,
    Unsupported,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentKind::Docx => "docx",
            ContentKind::Url => "url",
            ContentKind::Html => "html",
            ContentKind::PlainText => "plain_text",
            ContentKind::Pdf => "pdf",
            ContentKind::Unsupported => "unsupported",
        })
    }
}

/// Map an item to exactly one [`ContentKind`].
pub fn classify(item: &Item) -> ContentKind {
    if is_docx_resource().matches(item) {
        ContentKind::Docx
    } else if is_pdf_resource().matches(item) {
        ContentKind::Pdf
    } else if is_url_resource().matches(item) {
        ContentKind::Url
    } else if has_html_body().matches(item) {
        ContentKind::Html
    } else if has_simple_text_body().matches(item) {
        ContentKind::PlainText
    } else {
        ContentKind::Unsupported
    }
}

type Predicate = dyn Fn(&Item) -> bool + Send + Sync;

/// A named, composable predicate over items.
#[derive(Clone)]
pub struct Precondition {
    name: String,
    /// Whether `name` is a compound expression needing parentheses when
    /// nested inside a different operator.
    op: Op,
    check: Arc<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Leaf,
    And,
    Or,
}

impl Precondition {
    pub fn new(name: impl Into<String>, check: impl Fn(&Item) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            op: Op::Leaf,
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, item: &Item) -> bool {
        (self.check)(item)
    }

    /// Admission gate: `Ok` when the item satisfies the predicate, else
    /// `InvalidInput` naming the operation, the expression and the item.
    pub fn check(&self, operation: &str, item: &Item) -> Result<()> {
        if self.matches(item) {
            Ok(())
        } else {
            Err(TextpressError::InvalidInput {
                operation: operation.to_string(),
                detail: format!(
                    "item of type '{}' and format '{}' does not satisfy: {}",
                    item.item_type, item.format, self.name
                ),
            })
        }
    }

    fn operand(&self, parent: Op) -> String {
        if self.op == Op::Leaf || self.op == parent {
            self.name.clone()
        } else {
            format!("({})", self.name)
        }
    }

    fn combine(self, rhs: Self, op: Op) -> Self {
        let sep = if op == Op::And { " & " } else { " | " };
        let name = format!("{}{}{}", self.operand(op), sep, rhs.operand(op));
        let (l, r) = (self.check, rhs.check);
        let check: Arc<Predicate> = if op == Op::And {
            Arc::new(move |item: &Item| l(item) && r(item))
        } else {
            Arc::new(move |item: &Item| l(item) || r(item))
        };
        Self { name, op, check }
    }
}

impl fmt::Debug for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Precondition").field(&self.name).finish()
    }
}

impl BitAnd for Precondition {
    type Output = Precondition;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.combine(rhs, Op::And)
    }
}

impl BitOr for Precondition {
    type Output = Precondition;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.combine(rhs, Op::Or)
    }
}

impl Not for Precondition {
    type Output = Precondition;

    fn not(self) -> Self::Output {
        let name = if self.op == Op::Leaf {
            format!("!{}", self.name)
        } else {
            format!("!({})", self.name)
        };
        let inner = self.check;
        Precondition {
            name,
            op: Op::Leaf,
            check: Arc::new(move |item: &Item| !inner(item)),
        }
    }
}

// ── Named predicates ─────────────────────────────────────────────────────────

pub fn is_docx_resource() -> Precondition {
    Precondition::new("is_docx_resource", |item| {
        item.item_type == ItemType::Resource
            && item.format == Format::Docx
            && item.external_path.is_some()
    })
}

pub fn is_pdf_resource() -> Precondition {
    Precondition::new("is_pdf_resource", |item| {
        item.item_type == ItemType::Resource
            && item.format == Format::Pdf
            && item.external_path.is_some()
    })
}

pub fn is_url_resource() -> Precondition {
    Precondition::new("is_url_resource", |item| {
        item.item_type == ItemType::Resource && item.format == Format::Url && item.url.is_some()
    })
}

pub fn has_html_body() -> Precondition {
    Precondition::new("has_html_body", |item| {
        item.format == Format::Html && item.body.is_some()
    })
}

/// Markdown or plain text with a body.
pub fn has_simple_text_body() -> Precondition {
    Precondition::new("has_simple_text_body", |item| {
        matches!(item.format, Format::Markdown | Format::Plaintext) && item.body.is_some()
    })
}

/// An HTML body that is already a complete page (doctype or `<html>` root).
pub fn has_fullpage_html_body() -> Precondition {
    Precondition::new("has_fullpage_html_body", |item| {
        item.format == Format::Html && item.body.as_deref().is_some_and(is_full_page)
    })
}

fn is_full_page(body: &str) -> bool {
    let head: String = body
        .trim_start_matches('\u{FEFF}')
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

// ── Action gates ─────────────────────────────────────────────────────────────

/// Inputs accepted by `convert`, `format` and `publish`.
pub fn document_input() -> Precondition {
    (is_url_resource()
        | is_docx_resource()
        | is_pdf_resource()
        | has_html_body()
        | has_simple_text_body())
        & !has_fullpage_html_body()
}

/// Inputs accepted by `export`.
pub fn export_input() -> Precondition {
    is_url_resource() | is_docx_resource() | has_html_body() | has_simple_text_body()
}
