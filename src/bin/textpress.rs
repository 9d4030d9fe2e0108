//! CLI binary for textpress.
//!
//! A thin shim over the library crate: maps CLI flags to options, opens the
//! workspace, runs one action and prints where the results went.

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use textpress::actions::{self, Context, PublishOptions};
use textpress::config::DEFAULT_WORK_DIR;
use textpress::{prepare_input, ConvertOptions, FormatOptions, PdfConverter, Publisher, Workspace};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a Word document to Markdown
  textpress convert report.docx

  # Render a styled, minified HTML page
  textpress format --add_title notes.md

  # Publish a web page (format + upload)
  textpress publish https://example.com/article

  # Export Markdown to .docx
  textpress export draft.md

  # Normalise a Markdown file in place
  textpress reformat notes.md -o notes.md

ENVIRONMENT VARIABLES:
  TEXTPRESS_API_ROOT      Publishing API base URL (required for publish)
  TEXTPRESS_API_KEY       Publishing API key (required for publish)
  TEXTPRESS_PUBLISH_ROOT  Public URL prefix (default: https://texpr.com)
  TEXTPRESS_USERNAME      Account name; enables opening the published page
  TEXTPRESS_WORK_DIR      Work directory (default: ./textpress)
  RUST_LOG                Overrides the log filter

  A .env file in the current directory is read for the TEXTPRESS_* variables.
"#;

/// Convert, format and publish documents.
#[derive(Parser, Debug)]
#[command(
    name = "textpress",
    version,
    about = "Convert documents to clean Markdown and styled HTML, and publish them",
    long_about = "Convert .docx, PDF, HTML, Markdown or a web page into clean Markdown, render it \
as a single-file styled HTML page, and optionally publish the result.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Work directory holding the workspace, cache and logs.
    #[arg(
        long = "work_dir",
        visible_alias = "work-dir",
        env = "TEXTPRESS_WORK_DIR",
        default_value = DEFAULT_WORK_DIR,
        global = true
    )]
    work_dir: PathBuf,

    /// Ignore cached results and recompute.
    #[arg(long, global = true)]
    rerun: bool,

    /// DEBUG-level logging.
    #[arg(long, global = true)]
    debug: bool,

    /// INFO-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a document or URL to Markdown.
    Convert {
        /// Local file path or HTTP/HTTPS URL.
        input: String,
        #[command(flatten)]
        convert: ConvertArgs,
    },

    /// Convert, then render a styled and minified HTML page.
    Format {
        input: String,
        #[command(flatten)]
        format: FormatArgs,
    },

    /// Format, then upload the page and its Markdown source.
    Publish {
        input: String,
        #[command(flatten)]
        format: FormatArgs,
        /// Do not open the published page in a browser.
        #[arg(long = "no_open", alias = "no-open")]
        no_open: bool,
    },

    /// Convert, then write a .docx export.
    Export {
        input: String,
        #[command(flatten)]
        convert: ConvertArgs,
    },

    /// Normalise a Markdown file (whitespace, headings, tables).
    #[command(visible_alias = "reformat_md", alias = "reformat-md")]
    Reformat {
        /// Markdown file, or `-` for stdin.
        input: String,
        /// Output file, or `-` for stdout.
        #[arg(short, long, default_value = "-")]
        output: String,
    },
}

#[derive(Args, Debug, Clone)]
struct ConvertArgs {
    /// Tool used for PDF input.
    #[arg(long = "pdf_converter", alias = "pdf-converter", value_enum, default_value = "marker")]
    pdf_converter: PdfConverterArg,
}

#[derive(Args, Debug, Clone)]
struct FormatArgs {
    /// Add the document title as an <h1> at the top of the page.
    #[arg(long = "add_title", alias = "add-title")]
    add_title: bool,

    /// Space-separated CSS classes for the <body> element.
    #[arg(long = "add_classes", alias = "add-classes", value_name = "CLASSES")]
    add_classes: Option<String>,

    /// Skip HTML minification.
    #[arg(long = "no_minify", alias = "no-minify")]
    no_minify: bool,

    #[command(flatten)]
    convert: ConvertArgs,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PdfConverterArg {
    Marker,
    Markitdown,
}

impl From<PdfConverterArg> for PdfConverter {
    fn from(v: PdfConverterArg) -> Self {
        match v {
            PdfConverterArg::Marker => PdfConverter::Marker,
            PdfConverterArg::Markitdown => PdfConverter::Markitdown,
        }
    }
}

impl FormatArgs {
    fn options(&self) -> Result<FormatOptions> {
        let mut builder = FormatOptions::builder()
            .add_title(self.add_title)
            .no_minify(self.no_minify)
            .pdf_converter(self.convert.pdf_converter.into());
        if let Some(ref classes) = self.add_classes {
            builder = builder.add_classes(classes.clone());
        }
        Ok(builder.build()?)
    }
}

impl ConvertArgs {
    fn options(&self) -> ConvertOptions {
        ConvertOptions {
            pdf_converter: self.pdf_converter.into(),
            ..Default::default()
        }
    }
}

/// A command that runs against the workspace, with its options validated.
#[derive(Debug)]
enum WorkspaceCommand<'a> {
    Convert { input: &'a str, options: ConvertOptions },
    Format { input: &'a str, options: FormatOptions },
    Publish { input: &'a str, options: PublishOptions },
    Export { input: &'a str, options: ConvertOptions },
}

/// How a parsed command runs.
#[derive(Debug)]
enum Dispatch<'a> {
    /// Reads and writes plain files; no workspace, no log file.
    Reformat { input: &'a str, output: &'a str },
    Workspace(WorkspaceCommand<'a>),
}

impl Command {
    fn uses_workspace(&self) -> bool {
        !matches!(self, Command::Reformat { .. })
    }

    fn dispatch(&self) -> Result<Dispatch<'_>> {
        let command = match self {
            Command::Reformat { input, output } => {
                return Ok(Dispatch::Reformat { input, output })
            }
            Command::Convert { input, convert } => WorkspaceCommand::Convert {
                input,
                options: convert.options(),
            },
            Command::Format { input, format } => WorkspaceCommand::Format {
                input,
                options: format.options()?,
            },
            Command::Publish {
                input,
                format,
                no_open,
            } => WorkspaceCommand::Publish {
                input,
                options: PublishOptions {
                    format: format.options()?,
                    no_open: *no_open,
                },
            },
            Command::Export { input, convert } => WorkspaceCommand::Export {
                input,
                options: convert.options(),
            },
        };
        Ok(Dispatch::Workspace(command))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_file = Workspace::log_file_in(&cli.work_dir);
    let uses_workspace = cli.command.uses_workspace();

    if let Err(e) = init_logging(&cli, uses_workspace.then_some(log_file.as_path())) {
        eprintln!("{} cannot set up logging: {e:#}", red("error:"));
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            debug!(error = ?e, "Command failed");
            eprintln!("{} {e:#}", red("error:"));
            if uses_workspace {
                eprintln!("{}", dim(&format!("See logs for more details: {}", log_file.display())));
            }
            ExitCode::FAILURE
        }
    }
}

// ── Logging ──────────────────────────────────────────────────────────────────

fn init_logging(cli: &Cli, log_file: Option<&Path>) -> Result<()> {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "info"
    } else if cli.debug {
        "debug"
    } else {
        "warn"
    };
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new("textpress=debug,warn")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<ExitCode> {
    let command = match cli.command.dispatch()? {
        Dispatch::Reformat { input, output } => {
            reformat(input, output)?;
            return Ok(ExitCode::SUCCESS);
        }
        Dispatch::Workspace(command) => command,
    };

    let ws = Workspace::open(&cli.work_dir)
        .with_context(|| format!("Failed to open workspace in {}", cli.work_dir.display()))?;
    let result = run_in_workspace(&cli, &ws, command).await;
    let closed = ws.close().context("Failed to close workspace");
    let code = result?;
    closed?;
    Ok(code)
}

async fn run_in_workspace(
    cli: &Cli,
    ws: &Workspace,
    command: WorkspaceCommand<'_>,
) -> Result<ExitCode> {
    let ctx = Context::new(ws).rerun(cli.rerun);
    let show = |label: &str, item: &textpress::Item| {
        let path = ws.content_path(item).unwrap_or_default();
        println!("{label:<9}{}", path.display());
    };

    match command {
        WorkspaceCommand::Convert { input, options } => {
            let item = prepare_input(input)?;
            let md = actions::convert(&ctx, &item, &options)
                .await
                .with_context(|| format!("Conversion of '{input}' failed"))?;
            show("markdown", &md);
        }
        WorkspaceCommand::Format { input, options } => {
            let item = prepare_input(input)?;
            let out = actions::format(&ctx, &item, &options)
                .await
                .with_context(|| format!("Formatting '{input}' failed"))?;
            show("markdown", &out.markdown);
            show("html", &out.html);
        }
        WorkspaceCommand::Publish { input, options } => {
            let item = prepare_input(input)?;
            let report = actions::publish(&ctx, &item, &options, Publisher::from_env, &|url| {
                open::that(url)
            })
            .await
            .with_context(|| format!("Formatting '{input}' for publishing failed"))?;
            show("markdown", &report.formatted.markdown);
            show("html", &report.formatted.html);
            match report.outcome {
                Ok(published) => {
                    debug!(files = ?published.manifest.files.keys().collect::<Vec<_>>(), "Manifest");
                    if !cli.quiet {
                        eprintln!("{} published", green("✔"));
                    }
                    println!("{}", published.url);
                }
                Err(e) => {
                    eprintln!("{} publish failed: {e}", red("error:"));
                    eprintln!(
                        "{}",
                        dim(&format!(
                            "See logs for more details: {}",
                            ws.log_file().display()
                        ))
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        WorkspaceCommand::Export { input, options } => {
            let item = prepare_input(input)?;
            let docx = actions::export(&ctx, &item, &options)
                .await
                .with_context(|| format!("Export of '{input}' failed"))?;
            show("docx", &docx);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn reformat(input: &str, output: &str) -> Result<()> {
    let text = if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))?
    };

    let formatted = actions::reformat(&text);

    if output == "-" {
        io::stdout()
            .lock()
            .write_all(formatted.as_bytes())
            .context("Failed to write to stdout")?;
    } else {
        std::fs::write(output, formatted).with_context(|| format!("Failed to write {output}"))?;
    }
    Ok(())
}
