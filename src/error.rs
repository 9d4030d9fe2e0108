//! Error types for the textpress library.
//!
//! Two error types reflect two distinct boundaries:
//!
//! * [`TextpressError`]: **Fatal**: an operation cannot proceed (bad input,
//!   a delegate converter failed, the workspace is unusable). Returned as
//!   `Err(TextpressError)` from every pipeline stage and action.
//!
//! * [`PublishError`]: failures at the publish boundary. They are kept
//!   apart so the publish action can tell configuration problems, missing
//!   files and remote failures from each other, log them, and report a
//!   failed publish instead of aborting the process.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the textpress library.
#[derive(Debug, Error)]
pub enum TextpressError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The item's declared kind is not accepted by the requested operation.
    #[error("Invalid input for '{operation}': {detail}")]
    InvalidInput { operation: String, detail: String },

    /// The item's declared type/format matches no known content kind.
    #[error("Unsupported input: don't know how to convert item of type '{item_type}' and format '{format}'")]
    UnsupportedInput { item_type: String, format: String },

    /// A URL input could not be fetched.
    #[error("Failed to fetch '{url}': {reason}\nCheck your internet connection.")]
    FetchFailed { url: String, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// A required setting is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Stage errors ──────────────────────────────────────────────────────
    /// An external delegate (docx reader, HTML converter, renderer, minifier)
    /// failed. `completed` lists the stages that finished before it.
    #[error("{stage} failed: {detail}{}", completed_suffix(.completed))]
    StageFailed {
        stage: &'static str,
        completed: Vec<&'static str>,
        detail: String,
    },

    /// The external tool backing a PDF converter is not installed.
    #[error("PDF converter '{converter}' is not available: {detail}\nInstall it with: {hint}")]
    ConverterUnavailable {
        converter: String,
        detail: String,
        hint: String,
    },

    // ── Publish errors ────────────────────────────────────────────────────
    #[error(transparent)]
    Publish(#[from] PublishError),

    // ── Workspace / I/O errors ────────────────────────────────────────────
    /// Workspace directory layout or cache record problem.
    #[error("Workspace error at '{path}': {detail}")]
    Workspace { path: PathBuf, detail: String },

    /// Could not read or write a file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn completed_suffix(completed: &[&'static str]) -> String {
    if completed.is_empty() {
        String::new()
    } else {
        format!(" (completed: {})", completed.join(" → "))
    }
}

impl TextpressError {
    /// Wrap an I/O error, mapping `NotFound` and `PermissionDenied` to their
    /// dedicated variants.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => TextpressError::FileNotFound { path },
            std::io::ErrorKind::PermissionDenied => TextpressError::PermissionDenied { path },
            _ => TextpressError::Io { path, source },
        }
    }

    /// Wrap a delegate failure with the name of the stage that raised it.
    pub fn stage(stage: &'static str, detail: impl std::fmt::Display) -> Self {
        TextpressError::StageFailed {
            stage,
            completed: Vec::new(),
            detail: detail.to_string(),
        }
    }
}

/// Failures at the publish boundary.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A required environment variable is missing. Raised before any
    /// network call is attempted.
    #[error("{var} environment variable not set.\nExport it or add it to a .env file.")]
    Config { var: &'static str },

    /// A file passed to the publisher does not exist or cannot be read.
    #[error("Cannot publish '{path}': file not found or unreadable")]
    FileNotFound { path: PathBuf },

    /// Two files in one batch share a base name; the manifest could not
    /// tell them apart.
    #[error("Cannot publish two files named '{name}' in one batch")]
    DuplicateName { name: String },

    /// The publish endpoint answered with a non-success status.
    #[error("Publish request failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("Publish request failed: {0}")]
    Transport(String),

    /// The endpoint answered 2xx but the manifest could not be understood.
    #[error("Malformed publish response: {0}")]
    MalformedResponse(String),
}

impl PublishError {
    /// Short machine-friendly label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Config { .. } => "configuration",
            PublishError::FileNotFound { .. } => "file-not-found",
            PublishError::DuplicateName { .. } => "duplicate-name",
            PublishError::Http { .. } => "http",
            PublishError::Transport(_) => "transport",
            PublishError::MalformedResponse(_) => "malformed-response",
        }
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, TextpressError>;
