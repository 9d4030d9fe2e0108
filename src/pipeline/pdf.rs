//! PDF → Markdown through an external converter.
//!
//! Neither backend is a Rust library; both are Python command-line tools
//! that must be on `PATH`:
//!
//! | converter    | command                                         | output            |
//! |--------------|-------------------------------------------------|-------------------|
//! | `marker`     | `marker_single <pdf> --output_dir <tmp>`        | `<tmp>/**/<x>.md` |
//! | `markitdown` | `markitdown <pdf>`                              | stdout            |
//!
//! A missing executable is reported as
//! [`TextpressError::ConverterUnavailable`] with an install hint.

use crate::config::PdfConverter;
use crate::error::{Result, TextpressError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

impl PdfConverter {
    /// Executable invoked for this converter.
    pub fn program(&self) -> &'static str {
        match self {
            PdfConverter::Marker => "marker_single",
            PdfConverter::Markitdown => "markitdown",
        }
    }

    fn install_hint(&self) -> &'static str {
        match self {
            PdfConverter::Marker => "pip install marker-pdf",
            PdfConverter::Markitdown => "pip install 'markitdown[pdf]'",
        }
    }
}

/// Convert a PDF file to Markdown with the chosen converter.
pub async fn pdf_to_markdown(path: &Path, converter: PdfConverter) -> Result<String> {
    info!(converter = %converter, path = %path.display(), "Converting PDF");
    let markdown = match converter {
        PdfConverter::Markitdown => {
            let output = run(converter, Command::new(converter.program()).arg(path)).await?;
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        PdfConverter::Marker => {
            let out_dir = tempfile::tempdir().map_err(|e| TextpressError::Internal(e.to_string()))?;
            run(
                converter,
                Command::new(converter.program())
                    .arg(path)
                    .arg("--output_dir")
                    .arg(out_dir.path())
                    .arg("--output_format")
                    .arg("markdown"),
            )
            .await?;
            let md_path = find_markdown(out_dir.path()).ok_or_else(|| {
                TextpressError::stage("convert", "marker produced no Markdown file")
            })?;
            tokio::fs::read_to_string(&md_path)
                .await
                .map_err(|e| TextpressError::io(&md_path, e))?
        }
    };

    if markdown.trim().is_empty() {
        return Err(TextpressError::stage(
            "convert",
            format!("{converter} returned no text (is the PDF scanned images only?)"),
        ));
    }
    debug!(chars = markdown.len(), "PDF converted");
    Ok(markdown)
}

async fn run(converter: PdfConverter, command: &mut Command) -> Result<Output> {
    let output = command.kill_on_drop(true).output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TextpressError::ConverterUnavailable {
                converter: converter.to_string(),
                detail: format!("'{}' not found on PATH", converter.program()),
                hint: converter.install_hint().to_string(),
            }
        } else {
            TextpressError::stage("convert", format!("cannot run {}: {e}", converter.program()))
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(TextpressError::stage(
            "convert",
            format!(
                "{} exited with {}: {}",
                converter.program(),
                output.status,
                tail.join(" | ")
            ),
        ));
    }
    Ok(output)
}

/// First `.md` file under `dir`, searching breadth-first with each
/// directory's entries in sorted order. Unreadable subdirectories are skipped.
fn find_markdown(dir: &Path) -> Option<PathBuf> {
    let mut queue = VecDeque::from([dir.to_path_buf()]);
    while let Some(current) = queue.pop_front() {
        let Ok(read) = std::fs::read_dir(&current) else {
            debug!(dir = %current.display(), "Skipping unreadable directory");
            continue;
        };
        let mut entries: Vec<PathBuf> = read.filter_map(|e| e.ok().map(|e| e.path())).collect();
        entries.sort();
        if let Some(md) = entries
            .iter()
            .find(|p| p.is_file() && p.extension().is_some_and(|e| e == "md"))
        {
            return Some(md.clone());
        }
        queue.extend(entries.into_iter().filter(|p| p.is_dir()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programs_by_converter() {
        assert_eq!(PdfConverter::Marker.program(), "marker_single");
        assert_eq!(PdfConverter::Markitdown.program(), "markitdown");
    }

    #[test]
    fn finds_nested_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("report");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("report_meta.json"), "{}").unwrap();
        std::fs::write(nested.join("report.md"), "# Report").unwrap();
        assert_eq!(find_markdown(dir.path()), Some(nested.join("report.md")));
    }

    #[test]
    fn shallowest_markdown_wins_and_siblings_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a").join("deep");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("deep.md"), "# Deep").unwrap();
        for sibling in ["b", "c"] {
            let sub = dir.path().join(sibling);
            std::fs::create_dir_all(&sub).unwrap();
            std::fs::write(sub.join(format!("{sibling}.md")), "# Sibling").unwrap();
        }
        assert_eq!(
            find_markdown(dir.path()),
            Some(dir.path().join("b").join("b.md"))
        );
    }

    #[test]
    fn no_markdown_found() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_markdown(dir.path()), None);
    }

    #[tokio::test]
    async fn missing_tool_is_converter_unavailable() {
        let mut command = Command::new("textpress-no-such-converter-binary");
        let err = run(PdfConverter::Markitdown, &mut command).await.unwrap_err();
        match err {
            TextpressError::ConverterUnavailable { converter, hint, .. } => {
                assert_eq!(converter, "markitdown");
                assert!(hint.contains("pip install"));
            }
            other => panic!("expected ConverterUnavailable, got {other:?}"),
        }
    }
}
