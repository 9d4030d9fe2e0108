//! Pipeline stages for document conversion and publishing.
//!
//! Each submodule implements exactly one transformation step, and each is
//! independently testable. Third-party engines (docx parsing, html2md,
//! comrak, minify-html, the PDF tools) are only ever called from here.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─ docx ──┐
//! input ──▶  ├─ html ──┼─▶ cleanup ──▶ render ──▶ minify
//! (path/URL) └─ pdf  ──┘   (Markdown)  (comrak)   (minify-html)
//!                             │
//!                             └──▶ docx_export
//! ```
//!
//! 1. [`input`]: resolve a path or URL to an item; fetch URLs
//! 2. [`docx`]: `.docx` → Markdown + endnotes; runs in `spawn_blocking`
//! 3. [`html`]: HTML → Markdown via html2md
//! 4. [`pdf`]: PDF → Markdown via an external converter process
//! 5. [`cleanup`]: deterministic Markdown rules (footnotes, Works Cited,
//!    whitespace, tables)
//! 6. [`render`]: Markdown → full HTML page
//! 7. [`minify`]: HTML minification
//! 8. [`docx_export`]: Markdown → `.docx`

pub mod cleanup;
pub mod docx;
pub mod docx_export;
pub mod html;
pub mod input;
pub mod minify;
pub mod pdf;
pub mod render;
