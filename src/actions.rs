//! The named operations behind the CLI: `convert`, `format`, `publish`,
//! `export` and `reformat`.
//!
//! ```text
//! RAW ──convert──▶ CONVERTED(md) ──render──▶ RENDERED(html) ──minify──▶ MINIFIED ──upload──▶ PUBLISHED
//! ```
//!
//! Every action checks its admission gate before doing any work. Stages run
//! strictly in order; the first failure aborts the rest and the error names
//! the stages that completed. Items already saved stay in the workspace.
//! `convert`, `format` and `export` consult the action cache unless
//! [`Context::rerun`] is set.

use crate::config::{ConvertOptions, FormatOptions};
use crate::convert::convert_item;
use crate::error::{PublishError, Result, TextpressError};
use crate::item::{Format, Item, ItemType};
use crate::pipeline::{cleanup, docx_export, minify, render};
use crate::precondition::{document_input, export_input};
use crate::publish::{Manifest, Publisher};
use crate::workspace::Workspace;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What every action runs against.
pub struct Context<'a> {
    pub workspace: &'a Workspace,
    /// Ignore cached results and recompute.
    pub rerun: bool,
}

impl<'a> Context<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self {
            workspace,
            rerun: false,
        }
    }

    pub fn rerun(mut self, rerun: bool) -> Self {
        self.rerun = rerun;
        self
    }

    fn cached(&self, operation: &str, key: &str) -> Option<Vec<Item>> {
        if self.rerun {
            debug!(operation, "Rerun requested; skipping cache");
            return None;
        }
        self.workspace.cache_get(key)
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

/// Stages completed so far in one pipeline run.
#[derive(Debug, Default)]
pub struct PipelineProgress {
    completed: Vec<&'static str>,
}

impl PipelineProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> &[&'static str] {
        &self.completed
    }

    /// Record the outcome of `stage`. A stage failure is annotated with the
    /// stages that finished before it.
    pub fn step<T>(&mut self, stage: &'static str, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                debug!(stage, "Stage complete");
                self.completed.push(stage);
                Ok(value)
            }
            Err(TextpressError::StageFailed { stage, detail, .. }) => Err(TextpressError::StageFailed {
                stage,
                completed: self.completed.clone(),
                detail,
            }),
            Err(other) => Err(other),
        }
    }
}

// ── convert ──────────────────────────────────────────────────────────────

/// Convert `input` to Markdown and save it under `exports/`.
pub async fn convert(ctx: &Context<'_>, input: &Item, options: &ConvertOptions) -> Result<Item> {
    document_input().check("convert", input)?;
    let mut progress = PipelineProgress::new();
    convert_stage(ctx, input, options, &mut progress).await
}

async fn convert_stage(
    ctx: &Context<'_>,
    input: &Item,
    options: &ConvertOptions,
    progress: &mut PipelineProgress,
) -> Result<Item> {
    let ws = ctx.workspace;
    let key = ws.action_key("convert", options, input)?;
    if let Some(mut hit) = ctx.cached("convert", &key) {
        if let Some(item) = hit.pop() {
            info!(item = %item, "Using cached conversion");
            progress.step("convert", Ok(()))?;
            return Ok(item);
        }
    }

    let converted = progress.step("convert", convert_item(input, options).await)?;
    let saved = ws.save(&converted)?;
    ws.cache_put("convert", &key, std::slice::from_ref(&saved))?;
    Ok(saved)
}

// ── format ───────────────────────────────────────────────────────────────

/// The Markdown and HTML items produced by [`format`], saved under matching
/// file names.
#[derive(Debug, Clone)]
pub struct Formatted {
    pub markdown: Item,
    pub html: Item,
}

/// Convert, render and (unless disabled) minify `input`.
pub async fn format(ctx: &Context<'_>, input: &Item, options: &FormatOptions) -> Result<Formatted> {
    document_input().check("format", input)?;
    let start = Instant::now();
    let ws = ctx.workspace;
    let key = ws.action_key("format", options, input)?;
    if let Some(hit) = ctx.cached("format", &key) {
        if let [markdown, html] = hit.as_slice() {
            info!(html = %html, "Using cached format output");
            return Ok(Formatted {
                markdown: markdown.clone(),
                html: html.clone(),
            });
        }
    }

    let mut progress = PipelineProgress::new();
    let markdown = convert_stage(ctx, input, &options.convert, &mut progress).await?;
    let html = progress.step("render", render::render_page(&markdown, &options.render))?;
    let html = if options.no_minify {
        debug!("Minification disabled");
        html
    } else {
        progress.step("minify", minify::minify_item(&html))?
    };

    // Same stem as the Markdown file saved by the convert stage.
    let html = ws.save_as(&html, &format!("{}.html", markdown.slug()))?;
    ws.cache_put("format", &key, &[markdown.clone(), html.clone()])?;

    info!(
        stages = ?progress.completed(),
        html = %html,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Formatted"
    );
    Ok(Formatted { markdown, html })
}

// ── publish ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub format: FormatOptions,
    /// Do not open the published page in a browser.
    pub no_open: bool,
}

/// A completed upload.
#[derive(Debug, Clone)]
pub struct Published {
    pub manifest: Manifest,
    /// The manifest as stored in the workspace.
    pub manifest_item: Item,
    /// Public URL of the HTML page.
    pub url: String,
    pub opened: bool,
}

/// Outcome of [`publish`]. The format step always completed; the upload may
/// not have.
#[derive(Debug)]
pub struct PublishReport {
    pub formatted: Formatted,
    pub outcome: std::result::Result<Published, TextpressError>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn url(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(|p| p.url.as_str())
    }
}

/// Format `input`, then upload the HTML page and its Markdown source.
///
/// `connect` supplies the publisher; it is called after formatting and
/// before any upload. `open_url` opens the published page when a username
/// is configured and `no_open` is not set.
///
/// Errors from formatting are returned as `Err`. Failures of the upload
/// itself are logged and reported in [`PublishReport::outcome`].
pub async fn publish(
    ctx: &Context<'_>,
    input: &Item,
    options: &PublishOptions,
    connect: impl FnOnce() -> std::result::Result<Publisher, PublishError>,
    open_url: &dyn Fn(&str) -> std::io::Result<()>,
) -> Result<PublishReport> {
    document_input().check("publish", input)?;
    let formatted = format(ctx, input, &options.format).await?;
    let outcome = upload(ctx, &formatted, options, connect, open_url).await;
    if let Err(ref e) = outcome {
        let kind = match e {
            TextpressError::Publish(p) => p.kind(),
            _ => "unexpected",
        };
        error!(kind, error = %e, html = %formatted.html, "Publish failed");
    }
    Ok(PublishReport { formatted, outcome })
}

async fn upload(
    ctx: &Context<'_>,
    formatted: &Formatted,
    options: &PublishOptions,
    connect: impl FnOnce() -> std::result::Result<Publisher, PublishError>,
    open_url: &dyn Fn(&str) -> std::io::Result<()>,
) -> Result<Published> {
    let ws = ctx.workspace;
    let publisher = connect()?;

    let html_path = stored_path(ws, &formatted.html)?;
    let md_path = stored_path(ws, &formatted.markdown)?;
    let html_name = file_name(&html_path)?;

    let manifest = publisher.publish(&[html_path, md_path]).await?;
    let url = publisher.url_for(&html_name);

    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| TextpressError::Internal(format!("cannot serialise manifest: {e}")))?;
    let manifest_item = formatted
        .html
        .derived_copy()
        .with_type(ItemType::Config)
        .with_format(Format::Json)
        .with_title(Some("manifest".to_string()))
        .with_body(json);
    let manifest_item = ws.save(&manifest_item)?;
    info!(url = %url, files = manifest.len(), "Published");

    let opened = if publisher.config.username.is_some() && !options.no_open {
        match open_url(&url) {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %url, error = %e, "Could not open browser");
                false
            }
        }
    } else {
        false
    };

    Ok(Published {
        manifest,
        manifest_item,
        url,
        opened,
    })
}

fn stored_path(ws: &Workspace, item: &Item) -> Result<PathBuf> {
    ws.content_path(item).ok_or_else(|| TextpressError::Workspace {
        path: ws.store_root().to_path_buf(),
        detail: format!("item {item} has not been saved"),
    })
}

fn file_name(path: &std::path::Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| TextpressError::Internal(format!("no file name in '{}'", path.display())))
}

// ── export ───────────────────────────────────────────────────────────────

/// Convert `input` to Markdown, then write a `.docx` export next to it.
pub async fn export(ctx: &Context<'_>, input: &Item, options: &ConvertOptions) -> Result<Item> {
    export_input().check("export", input)?;
    let ws = ctx.workspace;
    let key = ws.action_key("export", options, input)?;
    if let Some(mut hit) = ctx.cached("export", &key) {
        if let Some(item) = hit.pop() {
            info!(item = %item, "Using cached export");
            return Ok(item);
        }
    }

    let mut progress = PipelineProgress::new();
    let markdown = convert_stage(ctx, input, options, &mut progress).await?;
    let title = markdown.title_or_heading();
    let bytes = progress.step(
        "export",
        docx_export::markdown_to_docx(markdown.body_str(), title.as_deref()),
    )?;
    let docx = markdown.derived_copy().with_format(Format::Docx);
    let docx = ws.save_binary(&docx, &format!("{}.docx", markdown.slug()), &bytes)?;
    ws.cache_put("export", &key, std::slice::from_ref(&docx))?;
    info!(item = %docx, bytes = bytes.len(), "Exported");
    Ok(docx)
}

// ── reformat ─────────────────────────────────────────────────────────────

/// Normalise a Markdown document. Needs no workspace.
pub fn reformat(markdown: &str) -> String {
    let out = cleanup::reformat_markdown(markdown);
    debug!(before = markdown.len(), after = out.len(), "Reformatted Markdown");
    out
}
