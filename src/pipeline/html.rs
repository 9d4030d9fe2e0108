//! HTML → Markdown via `html2md`.
//!
//! Scripts, styles and other non-content elements are removed first, and
//! when the input is a whole page only the `<body>` is converted. html2md
//! writes `h1`/`h2` as setext headings; those are rewritten as ATX so
//! titles can be read back from the first `#` line.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_NON_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template|svg)\b[^>]*>.*?</(script|style|noscript|template|svg)\s*>")
        .unwrap()
});
static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body\s*>").unwrap());
static RE_SETEXT_UNDERLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(=+|-+)[ \t]*$").unwrap());
static RE_BLOCK_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}([-*+>|#]|\d+[.)]|```|~~~)").unwrap());

/// Convert an HTML document or fragment to Markdown.
pub fn html_to_markdown(html: &str) -> String {
    let content = RE_BODY
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(html);
    let content = RE_COMMENT.replace_all(content, "");
    let content = RE_NON_CONTENT.replace_all(&content, "");
    setext_to_atx(&html2md::parse_html(&content))
}

/// Rewrite single-line setext headings (`Title` over `===`) as ATX.
fn setext_to_atx(md: &str) -> String {
    let lines: Vec<&str> = md.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut in_fence = false;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        let standalone = i == 0 || lines[i - 1].trim().is_empty();
        if !in_fence
            && standalone
            && !line.trim().is_empty()
            && !RE_BLOCK_START.is_match(line)
        {
            if let Some(caps) = lines.get(i + 1).and_then(|l| RE_SETEXT_UNDERLINE.captures(l)) {
                let marker = if caps[1].starts_with('=') { "#" } else { "##" };
                out.push(format!("{marker} {}", line.trim()));
                i += 2;
                continue;
            }
        }
        out.push(line.to_string());
        i += 1;
    }
    out.join("\n")
}
