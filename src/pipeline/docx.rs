//! `.docx` → Markdown.
//!
//! docx-rust unpacks and parses the package (document body, styles,
//! numbering, hyperlink relationships, endnotes and footnotes). This module
//! maps the parsed paragraphs, runs and tables to Markdown and collects the
//! referenced notes.
//!
//! What survives: headings (`Title`, `Heading 1-6`), paragraphs, bold /
//! italic / strikethrough runs, superscript runs as `<sup>…</sup>`,
//! hyperlinks, bulleted and numbered lists (with Word's numbering), block
//! quotes and tables. Note references are numbered in reading order and
//! rendered as `<sup>N</sup>`; the note texts come back as [`Endnote`]s for
//! [`cleanup::endnotes_to_footnotes`](super::cleanup::endnotes_to_footnotes).
//!
//! Images, comments, tracked deletions, field codes and tables nested in
//! table cells are dropped.

use crate::error::{Result, TextpressError};
use crate::pipeline::cleanup::Endnote;
use docx_rust::document::{
    BodyContent, BreakType, Numbering, Paragraph, ParagraphContent, Run, RunContent, Table,
    TableCellContent, TableRowContent,
};
use docx_rust::formatting::{CharacterProperty, VertAlignType};
use docx_rust::rels::Relationships;
use docx_rust::{Docx, DocxFile};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Parts every WordprocessingML package carries.
const REQUIRED_PARTS: [&str; 3] = ["[Content_Types].xml", "_rels/.rels", "word/document.xml"];

/// Markdown and notes extracted from a `.docx`.
#[derive(Debug, Clone, Default)]
pub struct DocxContent {
    pub markdown: String,
    /// Referenced notes, numbered in order of first reference.
    pub notes: Vec<Endnote>,
}

/// Read a `.docx` file. Parsing runs on the blocking pool.
pub async fn read_docx(path: &Path) -> Result<DocxContent> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let bytes = std::fs::read(&path).map_err(|e| TextpressError::io(&path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Read docx");
        docx_to_markdown(&bytes)
    })
    .await
    .map_err(|e| TextpressError::Internal(format!("docx reader task failed: {e}")))?
}

/// Convert the bytes of a `.docx` archive to Markdown.
pub fn docx_to_markdown(bytes: &[u8]) -> Result<DocxContent> {
    check_package(bytes)?;
    let file = DocxFile::from_reader(Cursor::new(bytes))
        .map_err(|e| TextpressError::stage("convert", format!("cannot read .docx package: {e}")))?;
    let docx = file
        .parse()
        .map_err(|e| TextpressError::stage("convert", format!("malformed .docx: {e}")))?;

    let styles = block_styles(&docx);
    let note_bodies = note_bodies(&docx);
    let mut renderer = Renderer::new(
        &styles,
        docx.numbering.as_ref(),
        docx.document_rels.as_ref(),
    );
    let markdown = renderer.render_document(&docx.document.body.content);

    let mut notes = Vec::new();
    for (number, key) in renderer.note_order.clone().into_iter().enumerate() {
        let Some(blocks) = note_bodies.get(&key) else {
            continue;
        };
        let text = renderer.render_note(blocks);
        if !text.is_empty() {
            notes.push(Endnote {
                number: number as u32 + 1,
                text,
            });
        }
    }

    debug!(
        chars = markdown.len(),
        notes = notes.len(),
        "Converted docx to Markdown"
    );
    Ok(DocxContent { markdown, notes })
}

/// Name the missing part instead of surfacing a bare "file not found".
fn check_package(bytes: &[u8]) -> Result<()> {
    let archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| TextpressError::stage("convert", format!("not a valid .docx archive: {e}")))?;
    let names: Vec<&str> = archive.file_names().collect();
    if let Some(missing) = REQUIRED_PARTS.iter().find(|part| !names.contains(part)) {
        return Err(TextpressError::stage(
            "convert",
            format!("not a .docx document: {missing} is missing"),
        ));
    }
    Ok(())
}

// ── Styles and notes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStyle {
    Heading(usize),
    Quote,
}

/// Classify a style by its name or id ("heading 2", "Heading2", "Title").
fn style_kind(name: &str) -> Option<BlockStyle> {
    let key: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match key.as_str() {
        "title" => Some(BlockStyle::Heading(1)),
        "quote" | "intensequote" | "blockquote" | "blocktext" => Some(BlockStyle::Quote),
        _ => key
            .strip_prefix("heading")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n >= 1)
            .map(|n| BlockStyle::Heading(n.min(6))),
    }
}

/// styleId → block style, for the styles that matter.
fn block_styles(docx: &Docx<'_>) -> HashMap<String, BlockStyle> {
    docx.styles
        .styles
        .iter()
        .filter_map(|style| {
            let kind = style
                .name
                .as_ref()
                .and_then(|name| style_kind(&name.value))
                .or_else(|| style_kind(&style.style_id))?;
            Some((style.style_id.to_string(), kind))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NoteKind {
    Endnote,
    Footnote,
}

type NoteKey = (NoteKind, String);

/// Note id → body, for the endnote and footnote parts. Separator notes are skipped.
fn note_bodies<'d, 'a>(docx: &'d Docx<'a>) -> HashMap<NoteKey, &'d [BodyContent<'a>]> {
    let mut bodies = HashMap::new();
    if let Some(endnotes) = docx.endnotes.as_ref() {
        for note in &endnotes.content {
            if let (None, Some(id)) = (&note.ty, note.id) {
                bodies.insert((NoteKind::Endnote, id.to_string()), note.content.as_slice());
            }
        }
    }
    if let Some(footnotes) = docx.footnotes.as_ref() {
        for note in &footnotes.content {
            if let (None, Some(id)) = (&note.ty, note.id) {
                bodies.insert((NoteKind::Footnote, id.to_string()), note.content.as_slice());
            }
        }
    }
    bodies
}

// ── Inlines ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RunStyle {
    bold: bool,
    italic: bool,
    strike: bool,
    superscript: bool,
}

#[derive(Debug, Clone)]
enum Inline {
    Text {
        text: String,
        style: RunStyle,
        link: Option<String>,
    },
    Break,
    NoteRef(NoteKind, String),
}

/// Toggle properties like `<w:b/>` are on unless `w:val` says otherwise.
fn toggle_on(value: Option<Option<bool>>) -> bool {
    matches!(value, Some(None | Some(true)))
}

fn run_style(property: Option<&CharacterProperty<'_>>) -> RunStyle {
    let Some(p) = property else {
        return RunStyle::default();
    };
    RunStyle {
        bold: toggle_on(p.bold.as_ref().map(|b| b.value)),
        italic: toggle_on(p.italics.as_ref().map(|i| i.value)),
        strike: toggle_on(p.strike.as_ref().map(|s| s.value))
            || toggle_on(p.dstrike.as_ref().map(|s| s.value)),
        superscript: matches!(
            p.vertical_align.as_ref().and_then(|v| v.value.as_ref()),
            Some(VertAlignType::Superscript)
        ),
    }
}

fn push_run(inlines: &mut Vec<Inline>, run: &Run<'_>, link: Option<&str>) {
    let style = run_style(run.property.as_ref());
    let push_text = |inlines: &mut Vec<Inline>, text: &str| {
        if !text.is_empty() {
            inlines.push(Inline::Text {
                text: text.to_string(),
                style,
                link: link.map(str::to_string),
            });
        }
    };
    for content in &run.content {
        match content {
            RunContent::Text(t) => push_text(inlines, &t.text),
            RunContent::Tab(_) | RunContent::PTab(_) => push_text(inlines, " "),
            RunContent::NoBreakHyphen(_) => push_text(inlines, "-"),
            RunContent::Break(b) if !matches!(b.ty, Some(BreakType::Page)) => {
                inlines.push(Inline::Break)
            }
            RunContent::CarriageReturn(_) => inlines.push(Inline::Break),
            RunContent::EndnoteReference(r) => {
                if let Some(id) = r.id.as_ref() {
                    inlines.push(Inline::NoteRef(NoteKind::Endnote, id.to_string()));
                }
            }
            RunContent::FootnoteReference(r) => {
                if let Some(id) = r.id.as_ref() {
                    inlines.push(Inline::NoteRef(NoteKind::Footnote, id.to_string()));
                }
            }
            _ => {}
        }
    }
}

/// Runs of a paragraph in reading order, with hyperlink targets resolved.
fn paragraph_inlines(p: &Paragraph<'_>, rels: Option<&Relationships<'_>>) -> Vec<Inline> {
    let mut inlines = Vec::new();
    for content in &p.content {
        match content {
            ParagraphContent::Run(run) => push_run(&mut inlines, run, None),
            ParagraphContent::Link(link) => {
                let target = link
                    .id
                    .as_deref()
                    .and_then(|id| rels.and_then(|r| r.get_target(id)));
                if let Some(run) = link.content.as_ref() {
                    push_run(&mut inlines, run, target);
                }
            }
            _ => {}
        }
    }
    inlines
}

fn list_position(p: &Paragraph<'_>) -> Option<(isize, isize)> {
    let numbering = p.property.as_ref()?.numbering.as_ref()?;
    let id = numbering.id.as_ref()?.value;
    if id == 0 {
        return None;
    }
    Some((id, numbering.level.as_ref().map_or(0, |l| l.value)))
}

// ── Rendering ────────────────────────────────────────────────────────────────

struct Renderer<'d> {
    styles: &'d HashMap<String, BlockStyle>,
    numbering: Option<&'d Numbering<'d>>,
    rels: Option<&'d Relationships<'d>>,
    /// Running item numbers per (numId, level).
    counters: HashMap<(isize, isize), u32>,
    note_numbers: HashMap<NoteKey, u32>,
    note_order: Vec<NoteKey>,
    in_notes: bool,
}

/// A rendered span of text sharing one style and link.
struct Span {
    text: String,
    style: RunStyle,
    link: Option<String>,
    raw: bool,
    /// Note markers stay one per span so `<sup>1</sup><sup>2</sup>` never fuses.
    note: bool,
}

impl<'d> Renderer<'d> {
    fn new(
        styles: &'d HashMap<String, BlockStyle>,
        numbering: Option<&'d Numbering<'d>>,
        rels: Option<&'d Relationships<'d>>,
    ) -> Self {
        Self {
            styles,
            numbering,
            rels,
            counters: HashMap::new(),
            note_numbers: HashMap::new(),
            note_order: Vec::new(),
            in_notes: false,
        }
    }

    fn render_document(&mut self, blocks: &[BodyContent<'_>]) -> String {
        let mut out = String::new();
        let mut previous_list = false;
        for block in blocks {
            let rendered = match block {
                BodyContent::Paragraph(p) => self.render_paragraph(p),
                BodyContent::Table(t) => self.render_table(t).map(|t| (t, false)),
                _ => None,
            };
            let Some((text, is_list)) = rendered else {
                continue;
            };
            if !out.is_empty() {
                out.push_str(if previous_list && is_list { "\n" } else { "\n\n" });
            }
            out.push_str(&text);
            previous_list = is_list;
        }
        out.push('\n');
        out
    }

    /// Note content as a single line.
    fn render_note(&mut self, blocks: &[BodyContent<'_>]) -> String {
        self.in_notes = true;
        let mut parts = Vec::new();
        for block in blocks {
            match block {
                BodyContent::Paragraph(p) => parts.push(self.paragraph_text(p)),
                BodyContent::Table(t) => {
                    for p in table_paragraphs(t) {
                        parts.push(self.paragraph_text(p));
                    }
                }
                _ => {}
            }
        }
        self.in_notes = false;
        parts
            .iter()
            .map(|p| p.replace("<br>", " "))
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Note parts carry their own relationships, which are not loaded; links
    /// inside notes keep their text only.
    fn paragraph_text(&mut self, p: &Paragraph<'_>) -> String {
        let rels = if self.in_notes { None } else { self.rels };
        let inlines = paragraph_inlines(p, rels);
        self.render_inlines(&inlines)
    }

    fn block_style(&self, p: &Paragraph<'_>) -> Option<BlockStyle> {
        let id: &str = &p.property.as_ref()?.style_id.as_ref()?.value;
        self.styles.get(id).copied().or_else(|| style_kind(id))
    }

    fn is_ordered(&self, num_id: isize, level: isize) -> bool {
        let Some(numbering) = self.numbering else {
            return false;
        };
        numbering
            .numbering_details(num_id)
            .and_then(|abs| {
                abs.levels
                    .iter()
                    .find(|l| l.i_level == Some(level))
                    .and_then(|l| l.number_format.as_ref())
                    .map(|fmt| fmt.value != "bullet" && fmt.value != "none")
            })
            .unwrap_or(false)
    }

    /// Rendered paragraph and whether it is a list item.
    fn render_paragraph(&mut self, p: &Paragraph<'_>) -> Option<(String, bool)> {
        let text = self.paragraph_text(p);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(BlockStyle::Heading(level)) = self.block_style(p) {
            let flat = text.replace("<br>", " ");
            return Some((format!("{} {}", "#".repeat(level), flat.trim()), false));
        }

        if let Some((num_id, level)) = list_position(p) {
            let indent = "    ".repeat(level.max(0) as usize);
            let marker = if self.is_ordered(num_id, level) {
                let counter = self.counters.entry((num_id, level)).or_insert(0);
                *counter += 1;
                format!("{counter}.")
            } else {
                "-".to_string()
            };
            self.counters
                .retain(|&(id, lvl), _| id != num_id || lvl <= level);
            return Some((format!("{indent}{marker} {text}"), true));
        }

        if self.block_style(p) == Some(BlockStyle::Quote) {
            return Some((format!("> {text}"), false));
        }

        let text = if text.starts_with('#') {
            format!("\\{text}")
        } else {
            text.to_string()
        };
        Some((text, false))
    }

    fn render_table(&mut self, table: &Table<'_>) -> Option<String> {
        let mut cells: Vec<Vec<String>> = Vec::new();
        for row in &table.rows {
            let mut rendered_row = Vec::new();
            for cell in row.cells.iter().filter_map(|c| match c {
                TableRowContent::TableCell(cell) => Some(cell),
                _ => None,
            }) {
                let mut parts = Vec::new();
                for content in &cell.content {
                    let TableCellContent::Paragraph(p) = content;
                    let text = self.paragraph_text(p).trim().to_string();
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
                rendered_row.push(parts.join("<br>").replace('|', "\\|"));
            }
            if !rendered_row.is_empty() {
                cells.push(rendered_row);
            }
        }
        let width = cells.iter().map(Vec::len).max()?;

        let line = |row: &[String]| {
            let mut s = String::from("|");
            for i in 0..width {
                s.push(' ');
                s.push_str(row.get(i).map(String::as_str).unwrap_or(""));
                s.push_str(" |");
            }
            s
        };
        let mut out = vec![line(&cells[0])];
        out.push(format!("|{}", " --- |".repeat(width)));
        out.extend(cells[1..].iter().map(|r| line(r)));
        Some(out.join("\n"))
    }

    fn render_inlines(&mut self, inlines: &[Inline]) -> String {
        let mut spans: Vec<Span> = Vec::new();
        for inline in inlines {
            let span = match inline {
                Inline::Text { text, style, link } => Span {
                    text: text.clone(),
                    style: *style,
                    link: link.clone(),
                    raw: false,
                    note: false,
                },
                Inline::Break => Span {
                    text: "<br>".to_string(),
                    style: RunStyle::default(),
                    link: None,
                    raw: true,
                    note: false,
                },
                Inline::NoteRef(kind, id) => {
                    if self.in_notes {
                        continue;
                    }
                    let number = self.note_number(*kind, id);
                    Span {
                        text: number.to_string(),
                        style: RunStyle {
                            superscript: true,
                            ..RunStyle::default()
                        },
                        link: None,
                        raw: false,
                        note: true,
                    }
                }
            };
            match spans.last_mut() {
                Some(last)
                    if !last.raw
                        && !span.raw
                        && !last.note
                        && !span.note
                        && last.style == span.style
                        && last.link == span.link =>
                {
                    last.text.push_str(&span.text);
                }
                _ => spans.push(span),
            }
        }

        let mut out = String::new();
        let mut i = 0;
        while i < spans.len() {
            let link = spans[i].link.clone();
            let mut j = i;
            let mut inner = String::new();
            while j < spans.len() && spans[j].link == link {
                inner.push_str(&styled(&spans[j]));
                j += 1;
            }
            match link {
                Some(url) if !inner.trim().is_empty() => {
                    out.push_str(&format!("[{}]({})", inner.trim(), link_target(&url)))
                }
                _ => out.push_str(&inner),
            }
            i = j;
        }
        out
    }

    fn note_number(&mut self, kind: NoteKind, id: &str) -> u32 {
        let key = (kind, id.to_string());
        if let Some(&n) = self.note_numbers.get(&key) {
            return n;
        }
        self.note_order.push(key.clone());
        let n = self.note_order.len() as u32;
        self.note_numbers.insert(key, n);
        n
    }
}

fn table_paragraphs<'t, 'a>(table: &'t Table<'a>) -> impl Iterator<Item = &'t Paragraph<'a>> {
    table
        .rows
        .iter()
        .flat_map(|row| row.cells.iter())
        .filter_map(|c| match c {
            TableRowContent::TableCell(cell) => Some(cell),
            _ => None,
        })
        .flat_map(|cell| cell.content.iter())
        .map(|content| match content {
            TableCellContent::Paragraph(p) => p,
        })
}

fn styled(span: &Span) -> String {
    if span.raw {
        return span.text.clone();
    }
    let mut text = escape_markdown(&span.text);
    if span.style.superscript && !text.trim().is_empty() {
        text = wrap(&text, "<sup>", "</sup>");
    }
    if span.style.italic {
        text = wrap(&text, "*", "*");
    }
    if span.style.bold {
        text = wrap(&text, "**", "**");
    }
    if span.style.strike {
        text = wrap(&text, "~~", "~~");
    }
    text
}

/// Wrap the non-whitespace core of `text`; emphasis markers must hug text.
fn wrap(text: &str, open: &str, close: &str) -> String {
    let core = text.trim();
    if core.is_empty() {
        return text.to_string();
    }
    let lead = &text[..text.len() - text.trim_start().len()];
    let trail = &text[text.trim_end().len()..];
    format!("{lead}{open}{core}{close}{trail}")
}

fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '<') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn link_target(url: &str) -> String {
    url.replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29")
}
