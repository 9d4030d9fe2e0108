//! End-to-end tests for the textpress actions.
//!
//! Everything here runs offline: inputs are written to temporary
//! directories, `.docx` fixtures are assembled in-test, and publishing goes
//! through a counting fake uploader instead of the network.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use textpress::actions::{self, Context, PublishOptions};
use textpress::{
    prepare_input, FormatOptions, Manifest, PublishError, Publisher, TextpressError, Uploader,
    Workspace,
};
use textpress::publish::{PublishConfig, PublishedFile, UploadFile};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn write(dir: &Path, name: &str, content: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn input(path: &Path) -> textpress::Item {
    prepare_input(path.to_str().unwrap()).unwrap()
}

/// Minimal `.docx` with the given body paragraphs and endnotes.
fn docx(paragraphs: &[&str], endnotes: &[(u32, &str)]) -> Vec<u8> {
    const NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;
    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;
    const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;
    let body: String = paragraphs.concat();
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document {NS}><w:body>{body}</w:body></w:document>"#
    );
    let notes: String = endnotes
        .iter()
        .map(|(id, text)| {
            format!(
                r#"<w:endnote w:id="{id}"><w:p><w:r><w:endnoteRef/></w:r><w:r><w:t xml:space="preserve"> {text}</w:t></w:r></w:p></w:endnote>"#
            )
        })
        .collect();
    let endnotes_xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:endnotes {NS}>{notes}</w:endnotes>"#
    );

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, xml) in [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", PACKAGE_RELS.to_string()),
        ("word/document.xml", document),
        ("word/endnotes.xml", endnotes_xml),
    ] {
        zip.start_file(name, options).unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn p(style: Option<&str>, inner: &str) -> String {
    let ppr = style
        .map(|s| format!(r#"<w:pPr><w:pStyle w:val="{s}"/></w:pPr>"#))
        .unwrap_or_default();
    format!("<w:p>{ppr}{inner}</w:p>")
}

fn t(text: &str) -> String {
    format!(r#"<w:r><w:t xml:space="preserve">{text}</w:t></w:r>"#)
}

fn note(id: u32) -> String {
    format!(r#"<w:r><w:endnoteReference w:id="{id}"/></w:r>"#)
}

/// Uploader that counts calls and echoes a manifest entry per file.
#[derive(Default)]
struct CountingUploader {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Uploader for CountingUploader {
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Manifest, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Manifest {
            files: files
                .into_iter()
                .map(|f| {
                    let size = f.bytes.len() as u64;
                    (
                        f.name,
                        PublishedFile {
                            size: Some(size),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        })
    }
}

fn config(username: Option<&str>) -> PublishConfig {
    PublishConfig {
        api_root: "https://api.example".into(),
        api_key: "test-key".into(),
        publish_root: "https://texpr.com".into(),
        username: username.map(str::to_string),
    }
}

fn no_browser(_: &str) -> std::io::Result<()> {
    Ok(())
}

// ── format ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_format_markdown_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(dir.path(), "hello.md", "# Hello\n\nWorld");
    let ws = Workspace::open(dir.path().join("work")).unwrap();

    let out = actions::format(&Context::new(&ws), &input(&src), &FormatOptions::default())
        .await
        .unwrap();

    let html = std::fs::read_to_string(ws.content_path(&out.html).unwrap()).unwrap();
    assert!(html.contains("<h1>Hello</h1>"), "got: {html}");
    assert!(html.contains("<p>World</p>"), "got: {html}");
    assert!(html.contains("<title>Hello</title>"), "got: {html}");
    assert!(!html.contains(">\n<"), "expected minified HTML: {html}");

    let md = std::fs::read_to_string(ws.content_path(&out.markdown).unwrap()).unwrap();
    assert_eq!(md, "# Hello\n\nWorld\n");
    assert_eq!(
        out.markdown.store_path.unwrap().file_stem(),
        out.html.store_path.unwrap().file_stem()
    );
    ws.close().unwrap();
}

#[tokio::test]
async fn test_format_rejects_full_page_html() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "page.html",
        "<!DOCTYPE html>\n<html><head><title>x</title></head><body><p>x</p></body></html>",
    );
    let ws = Workspace::open(dir.path().join("work")).unwrap();
    let err = actions::format(&Context::new(&ws), &input(&src), &FormatOptions::default())
        .await
        .unwrap_err();
    match err {
        TextpressError::InvalidInput { operation, detail } => {
            assert_eq!(operation, "format");
            assert!(detail.contains("fullpage"), "got: {detail}");
        }
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}

#[tokio::test]
async fn test_format_html_fragment_with_options() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "snippet.html",
        "<h2>Findings</h2><p>One <strong>bold</strong> claim.</p>",
    );
    let ws = Workspace::open(dir.path().join("work")).unwrap();
    let options = FormatOptions::builder()
        .add_title(true)
        .add_classes("dark")
        .no_minify(true)
        .build()
        .unwrap();
    let out = actions::format(&Context::new(&ws), &input(&src), &options)
        .await
        .unwrap();
    let html = out.html.body.unwrap();
    assert!(html.contains(r#"<body class="dark">"#));
    assert!(html.contains("<strong>bold</strong>"));
    assert!(html.contains("<h1>Findings</h1>"), "got: {html}");
}

// ── convert ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_docx_with_endnotes() {
    let dir = tempfile::tempdir().unwrap();
    let body = [
        p(Some("Heading1"), &t("Market Study")),
        p(None, &format!("{}{}", t("Demand grew."), note(1))),
        p(None, &format!("{}{}", t("Supply fell."), note(2))),
        p(Some("Heading2"), &t("WORKS   CITED")),
    ];
    let body: Vec<&str> = body.iter().map(String::as_str).collect();
    let src = write(
        dir.path(),
        "study.docx",
        docx(&body, &[(1, "Source A."), (2, "Source B.")]),
    );
    let ws = Workspace::open(dir.path().join("work")).unwrap();

    let md = actions::convert(&Context::new(&ws), &input(&src), &Default::default())
        .await
        .unwrap();
    let text = md.body_str();
    assert!(text.starts_with("# Market Study\n"), "got: {text}");
    assert!(text.contains("Demand grew.[^1]"), "got: {text}");
    assert!(text.contains("Supply fell.[^2]"), "got: {text}");
    assert!(text.contains("## Works Cited"), "got: {text}");
    assert_eq!(text.matches("]: Source").count(), 2, "got: {text}");
    assert!(text.find("[^1]: Source A.").unwrap() < text.find("[^2]: Source B.").unwrap());
    assert_eq!(
        md.store_path.as_deref(),
        Some(Path::new("exports/study.md"))
    );
}

#[tokio::test]
async fn test_convert_cache_and_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(dir.path(), "notes.txt", "plain   \n\n\n\ntext");
    let work = dir.path().join("work");

    let stored = {
        let ws = Workspace::open(&work).unwrap();
        let md = actions::convert(&Context::new(&ws), &input(&src), &Default::default())
            .await
            .unwrap();
        let path = ws.content_path(&md).unwrap();
        ws.close().unwrap();
        path
    };
    assert_eq!(std::fs::read_to_string(&stored).unwrap(), "plain\n\ntext\n");

    // A cache hit leaves the stored file untouched.
    let modified = std::fs::metadata(&stored).unwrap().modified().unwrap();
    let ws = Workspace::open(&work).unwrap();
    let cached = actions::convert(&Context::new(&ws), &input(&src), &Default::default())
        .await
        .unwrap();
    assert_eq!(cached.body.as_deref(), Some("plain\n\ntext\n"));
    assert_eq!(std::fs::metadata(&stored).unwrap().modified().unwrap(), modified);

    // A hand edit to the stored output invalidates the record.
    std::fs::write(&stored, "edited\n").unwrap();
    let recomputed = actions::convert(&Context::new(&ws), &input(&src), &Default::default())
        .await
        .unwrap();
    assert_eq!(recomputed.body.as_deref(), Some("plain\n\ntext\n"));
    assert_eq!(std::fs::read_to_string(&stored).unwrap(), "plain\n\ntext\n");

    let fresh = actions::convert(
        &Context::new(&ws).rerun(true),
        &input(&src),
        &Default::default(),
    )
    .await
    .unwrap();
    assert_eq!(fresh.body.as_deref(), Some("plain\n\ntext\n"));
}

#[tokio::test]
async fn test_convert_same_title_keeps_outputs_apart() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = write(dir.path(), "alpha.md", "# Hello\n\nAlpha");
    let bravo = write(dir.path(), "bravo.md", "# Hello\n\nBravo");
    let ws = Workspace::open(dir.path().join("work")).unwrap();
    let ctx = Context::new(&ws);

    for (src, expected) in [
        (&alpha, "Alpha"),
        (&bravo, "Bravo"),
        (&alpha, "Alpha"),
    ] {
        let md = actions::convert(&ctx, &input(src), &Default::default())
            .await
            .unwrap();
        assert!(md.body_str().contains(expected), "got: {}", md.body_str());
    }
}

#[test]
fn test_missing_input_is_file_not_found() {
    let err = prepare_input("/definitely/not/here.docx").unwrap_err();
    assert!(matches!(err, TextpressError::FileNotFound { .. }));
}

// ── export ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_export_docx_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "brief.md",
        "# Brief\n\nSome *emphasis* here.\n\n| a | b |\n| --- | --- |\n| 1 | 2 |\n",
    );
    let ws = Workspace::open(dir.path().join("work")).unwrap();
    let out = actions::export(&Context::new(&ws), &input(&src), &Default::default())
        .await
        .unwrap();

    let path = out.external_path.clone().unwrap();
    assert!(path.ends_with("exports/brief.docx"));
    let back = textpress::convert_input(path.to_str().unwrap(), &Default::default())
        .await
        .unwrap();
    let md = back.body_str();
    assert!(md.contains("# Brief"), "got: {md}");
    assert!(md.contains("*emphasis*"), "got: {md}");
    assert!(md.contains("| 1 | 2 |"), "got: {md}");
}

// ── publish ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_publish_missing_config_makes_no_upload() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(dir.path(), "post.md", "# Post\n\nBody");
    let ws = Workspace::open(dir.path().join("work")).unwrap();
    let uploader = CountingUploader::default();
    let calls = Arc::clone(&uploader.calls);

    let report = actions::publish(
        &Context::new(&ws),
        &input(&src),
        &PublishOptions::default(),
        || Publisher::with_uploader(|_| None, Box::new(uploader)),
        &no_browser,
    )
    .await
    .unwrap();

    assert!(!report.is_success());
    assert!(matches!(
        report.outcome,
        Err(TextpressError::Publish(PublishError::Config { var: "TEXTPRESS_API_ROOT" }))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // The format step still ran and saved its outputs.
    assert!(ws.content_path(&report.formatted.html).unwrap().is_file());
}

#[tokio::test]
async fn test_publish_uploads_once_and_records_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(dir.path(), "post.md", "# Launch Notes\n\nBody");
    let ws = Workspace::open(dir.path().join("work")).unwrap();
    let uploader = CountingUploader::default();
    let calls = Arc::clone(&uploader.calls);

    let options = PublishOptions {
        no_open: true,
        ..Default::default()
    };
    let report = actions::publish(
        &Context::new(&ws),
        &input(&src),
        &options,
        || Ok(Publisher::new(config(Some("ada")), Box::new(uploader))),
        &|_| panic!("--no_open must not open a browser"),
    )
    .await
    .unwrap();

    let published = report.outcome.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(published.url, "https://texpr.com/ada/d/launch_notes.html");
    assert_eq!(
        published.manifest.files.keys().collect::<Vec<_>>(),
        ["launch_notes.html", "launch_notes.md"]
    );
    assert!(!published.opened);

    let stored = ws.content_path(&published.manifest_item).unwrap();
    assert!(stored.ends_with("configs/manifest.json"));
    let manifest: Manifest =
        serde_json::from_str(&std::fs::read_to_string(stored).unwrap()).unwrap();
    assert_eq!(manifest, published.manifest);
}

#[tokio::test]
async fn test_publish_files_missing_path_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let present = write(dir.path(), "a.html", "<p>a</p>");
    let uploader = CountingUploader::default();
    let calls = Arc::clone(&uploader.calls);

    let err = textpress::publish_files(&[present, dir.path().join("gone.html")], &uploader)
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::FileNotFound { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
