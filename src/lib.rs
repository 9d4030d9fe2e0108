//! # textpress
//!
//! Turn `.docx`, PDF, HTML, Markdown or a web page into a clean, styled,
//! single-file HTML page, and optionally publish it to a hosting service.
//!
//! Document parsing, Markdown rendering and HTML minification are done by
//! established libraries and tools. This crate composes them: it checks what
//! kind of input it was given, runs the stages in order, keeps every derived
//! item in a local workspace and caches results between runs.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input (path / URL)
//!  │
//!  ├─ 1. Classify  admission gate per operation (docx, pdf, url, html, text)
//!  ├─ 2. Convert   docx / html / pdf → Markdown, then cleanup rules
//!  ├─ 3. Render    Markdown → full HTML page (comrak)
//!  ├─ 4. Minify    minify-html
//!  └─ 5. Publish   multipart upload, manifest, public URL
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use textpress::actions::{self, Context};
//! use textpress::{prepare_input, FormatOptions, Workspace};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ws = Workspace::open("./textpress")?;
//!     let input = prepare_input("report.docx")?;
//!     let out = actions::format(&Context::new(&ws), &input, &FormatOptions::default()).await?;
//!     println!("{}", ws.content_path(&out.html).unwrap_or_default().display());
//!     ws.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `textpress` binary (clap + anyhow + tracing-subscriber + open) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! textpress = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod actions;
pub mod config;
pub mod convert;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod precondition;
pub mod publish;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use actions::{Context, Formatted, PipelineProgress, PublishOptions, PublishReport};
pub use config::{ConvertOptions, FormatOptions, FormatOptionsBuilder, PdfConverter, RenderOptions};
pub use convert::{convert_input, convert_item, convert_sync};
pub use error::{PublishError, TextpressError};
pub use item::{Format, Item, ItemType};
pub use pipeline::input::prepare_input;
pub use precondition::{classify, ContentKind, Precondition};
pub use publish::{
    publish_files, publish_files_from_env, published_url, Manifest, PublishConfig, Publisher,
    Uploader,
};
pub use workspace::Workspace;
