//! Markdown → `.docx`.
//!
//! The Markdown is parsed with comrak and its AST mapped onto docx-rust's
//! document model, which writes the package (document, styles, numbering,
//! core properties).
//!
//! Mapping:
//! - headings → `Heading1`..`Heading6`, paragraphs → `Normal`
//! - emphasis / strong / strikethrough / inline code → run properties
//! - links → underlined text (the target is not kept)
//! - bullet and ordered lists → Word numbering, nested by level
//! - block quotes → `Quote`, code blocks → `Code` paragraphs, one per line
//! - tables → `TableGrid` tables with a bold header row
//! - footnotes → superscript numbers, definitions listed under "Notes"

use crate::error::{Result, TextpressError};
use comrak::nodes::{AstNode, ListType, NodeValue};
use comrak::{parse_document, Arena, Options};
use docx_rust::content_type::OverrideContentType;
use docx_rust::core::{Core, CoreNamespace};
use docx_rust::document::{
    AbstractNum, AbstractNumId, BodyContent, BreakType, Level, LevelOverride, LevelStart,
    LevelText, MultiLevelType, Num, NumFmt, Numbering, PPr, Paragraph, Run, StartOverride, Table,
    TableCell, TableGrid, TableRow, TextSpace,
};
use docx_rust::formatting::{
    BorderStyle, Borders, BottomBorder, CharacterProperty, Fonts, Indent, InsideHorizonBorder,
    InsideVerticalBorder, LeftBorder, NumberingProperty, ParagraphProperty, RightBorder, Spacing,
    TableBorders, TableProperty, TopBorder, UnderlineStyle, VertAlign, VertAlignType,
};
use docx_rust::styles::{Style, StyleType, Styles};
use docx_rust::Docx;
use std::collections::HashMap;
use std::io::Cursor;

const NUMBERING_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml";

/// Build a `.docx` package from Markdown.
pub fn markdown_to_docx(markdown: &str, title: Option<&str>) -> Result<Vec<u8>> {
    let arena = Arena::new();
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.extension.footnotes = true;
    let root = parse_document(&arena, markdown, &options);

    let mut writer = DocxWriter::default();
    writer.blocks(root, Context::default());
    writer.notes_section();

    let mut docx = Docx::default();
    docx.document.body.content = std::mem::take(&mut writer.body);
    docx.styles = styles();
    docx.numbering = Some(writer.numbering());
    docx.core = Some(Core::CoreNamespace(CoreNamespace {
        title: title.map(|t| t.to_string().into()),
        creator: Some("textpress".into()),
        ..Default::default()
    }));
    // No app.xml part is written; numbering.xml needs its own override.
    docx.content_types
        .overrides
        .retain(|o| o.part != "/docProps/app.xml");
    docx.content_types.overrides.push(OverrideContentType {
        part: "/word/numbering.xml".into(),
        ty: NUMBERING_CONTENT_TYPE.into(),
    });

    let cursor = docx
        .write(Cursor::new(Vec::new()))
        .map_err(|e| TextpressError::stage("export", format!("cannot write .docx: {e}")))?;
    Ok(cursor.into_inner())
}

// ── Styles ───────────────────────────────────────────────────────────────────

fn spacing(before: isize, after: isize) -> Spacing {
    Spacing {
        before: Some(before),
        after: Some(after),
        ..Default::default()
    }
}

fn left_indent(left: isize, hanging: Option<isize>) -> Indent {
    Indent {
        left: Some(left),
        hanging,
        ..Default::default()
    }
}

fn code_fonts() -> Fonts {
    Fonts::default()
        .ascii("Consolas")
        .h_ansi("Consolas")
        .custom("Consolas")
}

fn styles() -> Styles<'static> {
    let mut styles = Styles::new();

    let mut normal = Style::new(StyleType::Paragraph, "Normal")
        .name("Normal")
        .paragraph(ParagraphProperty::default().spacing(spacing(0, 160)))
        .character(CharacterProperty::default().size(22isize));
    normal.default = Some(true);
    styles.push(normal);

    for (i, size) in [40isize, 32, 28, 26, 24, 22].into_iter().enumerate() {
        let level = i + 1;
        styles.push(
            Style::new(StyleType::Paragraph, format!("Heading{level}"))
                .name(format!("heading {level}"))
                .paragraph(ParagraphProperty::default().spacing(spacing(240, 80)))
                .character(CharacterProperty::default().bold(true).size(size)),
        );
    }

    styles.push(
        Style::new(StyleType::Paragraph, "Quote")
            .name("Quote")
            .paragraph(ParagraphProperty::default().indent(left_indent(720, None)))
            .character(CharacterProperty::default().italics(true).color("595959")),
    );
    styles.push(
        Style::new(StyleType::Paragraph, "Code")
            .name("Code")
            .paragraph(ParagraphProperty::default().spacing(spacing(0, 0)))
            .character(CharacterProperty::default().fonts(code_fonts()).size(20isize)),
    );
    styles.push(
        Style::new(StyleType::Paragraph, "ListParagraph")
            .name("List Paragraph")
            .paragraph(
                ParagraphProperty::default()
                    .spacing(spacing(0, 60))
                    .indent(left_indent(720, None)),
            ),
    );
    styles.push(Style::new(StyleType::Table, "TableGrid").name("Table Grid"));
    styles
}

fn table_borders() -> TableBorders<'static> {
    TableBorders {
        top: Some(TopBorder::default().style(BorderStyle::Single).size(4isize)),
        left: Some(LeftBorder::default().style(BorderStyle::Single).size(4isize)),
        bottom: Some(BottomBorder::default().style(BorderStyle::Single).size(4isize)),
        right: Some(RightBorder::default().style(BorderStyle::Single).size(4isize)),
        inside_horizon: Some(
            InsideHorizonBorder::default()
                .style(BorderStyle::Single)
                .size(4isize),
        ),
        inside_vertical: Some(
            InsideVerticalBorder::default()
                .style(BorderStyle::Single)
                .size(4isize),
        ),
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

const BULLET_NUM_ID: isize = 1;
const BULLET_ABSTRACT: isize = 0;
const DECIMAL_ABSTRACT: isize = 1;
const MAX_LEVEL: isize = 8;
/// Text width of a portrait A4 page with 1" margins, in twentieths of a point.
const TABLE_WIDTH: isize = 9026;

/// Run formatting.
#[derive(Debug, Clone, Copy, Default)]
struct Fmt {
    bold: bool,
    italic: bool,
    strike: bool,
    code: bool,
    link: bool,
    superscript: bool,
}

impl Fmt {
    fn property(self) -> Option<CharacterProperty<'static>> {
        let mut p = CharacterProperty::default();
        let mut any = false;
        if self.code {
            p = p.fonts(code_fonts());
            any = true;
        }
        if self.bold {
            p = p.bold(true);
            any = true;
        }
        if self.italic {
            p = p.italics(true);
            any = true;
        }
        if self.strike {
            p = p.strike(true);
            any = true;
        }
        if self.link {
            p = p.color("0A58CA").underline(UnderlineStyle::Single);
            any = true;
        }
        if self.superscript {
            p.vertical_align = Some(VertAlign {
                value: Some(VertAlignType::Superscript),
            });
            any = true;
        }
        any.then_some(p)
    }
}

/// Block nesting state.
#[derive(Debug, Clone, Copy, Default)]
struct Context {
    quote: bool,
    /// (numId, level) of the enclosing list item, for its first paragraph.
    numbered: Option<(isize, isize)>,
    /// Inside a list item, past its first paragraph.
    in_item: bool,
    level: isize,
}

type Runs = Vec<Run<'static>>;

#[derive(Default)]
struct DocxWriter {
    body: Vec<BodyContent<'static>>,
    /// (numId, level, start) for each ordered list.
    ordered: Vec<(isize, isize, isize)>,
    footnote_numbers: HashMap<String, usize>,
    /// (number, runs) per footnote definition.
    footnotes: Vec<(usize, Runs)>,
    html_superscript: bool,
}

impl DocxWriter {
    fn blocks<'a>(&mut self, node: &'a AstNode<'a>, ctx: Context) {
        for child in node.children() {
            self.block(child, ctx);
        }
    }

    fn block<'a>(&mut self, node: &'a AstNode<'a>, ctx: Context) {
        let value = node.data.borrow().value.clone();
        match value {
            NodeValue::Heading(ref h) => {
                let runs = self.inline_children(node, Fmt::default());
                let style = format!("Heading{}", h.level.clamp(1, 6));
                self.paragraph(Some(&style), None, runs);
            }
            NodeValue::Paragraph => {
                let runs = self.inline_children(node, Fmt::default());
                self.context_paragraph(ctx, runs);
            }
            NodeValue::BlockQuote => self.blocks(
                node,
                Context {
                    quote: true,
                    ..ctx
                },
            ),
            NodeValue::List(ref list) => {
                let level = if ctx.in_item || ctx.numbered.is_some() {
                    ctx.level + 1
                } else {
                    0
                };
                let num_id = if list.list_type == ListType::Ordered {
                    let id = BULLET_NUM_ID + 1 + self.ordered.len() as isize;
                    self.ordered.push((id, level, list.start.max(1) as isize));
                    id
                } else {
                    BULLET_NUM_ID
                };
                for item in node.children() {
                    let item_ctx = Context {
                        quote: ctx.quote,
                        numbered: Some((num_id, level)),
                        in_item: false,
                        level,
                    };
                    let mut first = true;
                    for child in item.children() {
                        let child_ctx = if first {
                            item_ctx
                        } else {
                            Context {
                                numbered: None,
                                in_item: true,
                                ..item_ctx
                            }
                        };
                        self.block(child, child_ctx);
                        first = false;
                    }
                }
            }
            NodeValue::CodeBlock(ref code) => {
                let literal = code.literal.trim_end_matches('\n');
                for line in literal.split('\n') {
                    let runs = run(line, Fmt { code: true, ..Fmt::default() });
                    self.paragraph(Some("Code"), None, runs.into_iter().collect());
                }
            }
            NodeValue::HtmlBlock(ref html) => {
                let text = strip_tags(&html.literal);
                let text = text.trim();
                if !text.is_empty() {
                    self.context_paragraph(ctx, run(text, Fmt::default()).into_iter().collect());
                }
            }
            NodeValue::ThematicBreak => {
                let rule = Borders::default()
                    .bottom(BottomBorder::default().style(BorderStyle::Single).size(6isize));
                self.body.push(
                    Paragraph::default()
                        .property(ParagraphProperty::default().border(rule))
                        .into(),
                );
            }
            NodeValue::Table(..) => self.table(node),
            NodeValue::FootnoteDefinition(ref def) => {
                let number = self.footnote_number(&def.name);
                let mut runs = Runs::new();
                for child in node.children() {
                    if !runs.is_empty() {
                        runs.extend(run(" ", Fmt::default()));
                    }
                    runs.extend(self.inline_children(child, Fmt::default()));
                }
                self.footnotes.push((number, runs));
            }
            _ => self.blocks(node, ctx),
        }
    }

    fn context_paragraph(&mut self, ctx: Context, runs: Runs) {
        if let Some((num_id, level)) = ctx.numbered {
            self.paragraph(Some("ListParagraph"), Some((num_id, level)), runs);
        } else if ctx.in_item {
            self.paragraph(Some("ListParagraph"), None, runs);
        } else if ctx.quote {
            self.paragraph(Some("Quote"), None, runs);
        } else {
            self.paragraph(None, None, runs);
        }
    }

    fn paragraph(&mut self, style: Option<&str>, numbering: Option<(isize, isize)>, runs: Runs) {
        self.body.push(paragraph(style, numbering, runs).into());
    }

    fn table<'a>(&mut self, node: &'a AstNode<'a>) {
        let mut table = Table::default().property(
            TableProperty::default()
                .style_id("TableGrid")
                .borders(table_borders()),
        );
        for row in node.children() {
            let header = matches!(row.data.borrow().value, NodeValue::TableRow(true));
            let mut table_row = TableRow::default();
            for cell in row.children() {
                let runs = self.inline_children(
                    cell,
                    Fmt {
                        bold: header,
                        ..Fmt::default()
                    },
                );
                table_row = table_row.push_cell(TableCell::paragraph(paragraph(None, None, runs)));
            }
            table = table.push_row(table_row);
        }
        let columns = node
            .first_child()
            .map_or(0, |row| row.children().count())
            .max(1);
        table.grids = TableGrid::from(vec![TABLE_WIDTH / columns as isize; columns]);
        self.body.push(table.into());
    }

    fn inline_children<'a>(&mut self, node: &'a AstNode<'a>, fmt: Fmt) -> Runs {
        let mut out = Runs::new();
        for child in node.children() {
            self.inline(child, fmt, &mut out);
        }
        out
    }

    fn inline<'a>(&mut self, node: &'a AstNode<'a>, fmt: Fmt, out: &mut Runs) {
        let value = node.data.borrow().value.clone();
        let fmt = Fmt {
            superscript: fmt.superscript || self.html_superscript,
            ..fmt
        };
        match value {
            NodeValue::Text(ref text) => out.extend(run(text, fmt)),
            NodeValue::Code(ref code) => out.extend(run(&code.literal, Fmt { code: true, ..fmt })),
            NodeValue::SoftBreak => out.extend(run(" ", fmt)),
            NodeValue::LineBreak => out.push(line_break()),
            NodeValue::Emph => self.inline_into(node, Fmt { italic: true, ..fmt }, out),
            NodeValue::Strong => self.inline_into(node, Fmt { bold: true, ..fmt }, out),
            NodeValue::Strikethrough => self.inline_into(node, Fmt { strike: true, ..fmt }, out),
            NodeValue::Link(..) => self.inline_into(node, Fmt { link: true, ..fmt }, out),
            NodeValue::FootnoteReference(ref r) => {
                let number = self.footnote_number(&r.name);
                out.extend(run(
                    &number.to_string(),
                    Fmt {
                        superscript: true,
                        ..fmt
                    },
                ));
            }
            NodeValue::HtmlInline(ref html) => {
                let tag = html.trim().to_ascii_lowercase();
                match tag.as_str() {
                    "<sup>" => self.html_superscript = true,
                    "</sup>" => self.html_superscript = false,
                    "<br>" | "<br/>" | "<br />" => out.push(line_break()),
                    _ => {}
                }
            }
            _ => self.inline_into(node, fmt, out),
        }
    }

    fn inline_into<'a>(&mut self, node: &'a AstNode<'a>, fmt: Fmt, out: &mut Runs) {
        for child in node.children() {
            self.inline(child, fmt, out);
        }
    }

    fn footnote_number(&mut self, name: &str) -> usize {
        let next = self.footnote_numbers.len() + 1;
        *self
            .footnote_numbers
            .entry(name.to_string())
            .or_insert(next)
    }

    fn notes_section(&mut self) {
        if self.footnotes.is_empty() {
            return;
        }
        let mut notes = std::mem::take(&mut self.footnotes);
        notes.sort_by_key(|(n, _)| *n);
        self.paragraph(
            Some("Heading2"),
            None,
            run("Notes", Fmt::default()).into_iter().collect(),
        );
        for (number, runs) in notes {
            let mut line: Runs = run(&format!("{number}. "), Fmt::default()).into_iter().collect();
            line.extend(runs);
            self.paragraph(None, None, line);
        }
    }

    /// One bullet definition, one decimal definition, and a numbering
    /// instance per ordered list so each restarts at its own start value.
    fn numbering(&self) -> Numbering<'static> {
        let bullets = ["•", "◦", "▪"];
        let abstract_num = |id: isize, format: &'static str, text: &dyn Fn(isize) -> String| {
            AbstractNum {
                abstract_num_id: Some(id),
                multi_level_type: Some(MultiLevelType {
                    value: "hybridMultilevel".into(),
                }),
                levels: (0..=MAX_LEVEL)
                    .map(|level| Level {
                        i_level: Some(level),
                        start: Some(LevelStart { value: Some(1) }),
                        number_format: Some(NumFmt {
                            value: format.into(),
                        }),
                        level_text: Some(LevelText {
                            value: Some(text(level).into()),
                        }),
                        p_pr: Some(PPr {
                            indent: Some(left_indent(720 * (level + 1), Some(360))),
                        }),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }
        };

        let mut numberings = vec![Num {
            num_id: Some(BULLET_NUM_ID),
            abstract_num_id: Some(AbstractNumId {
                value: Some(BULLET_ABSTRACT),
            }),
            ..Default::default()
        }];
        for &(num_id, level, start) in &self.ordered {
            numberings.push(Num {
                num_id: Some(num_id),
                abstract_num_id: Some(AbstractNumId {
                    value: Some(DECIMAL_ABSTRACT),
                }),
                level_overrides: vec![LevelOverride {
                    i_level: Some(level.min(MAX_LEVEL)),
                    start_override: Some(StartOverride { value: Some(start) }),
                }],
            });
        }

        Numbering {
            abstract_numberings: vec![
                abstract_num(BULLET_ABSTRACT, "bullet", &|level| {
                    bullets[level as usize % bullets.len()].to_string()
                }),
                abstract_num(DECIMAL_ABSTRACT, "decimal", &|level| format!("%{}.", level + 1)),
            ],
            numberings,
        }
    }
}

fn paragraph(
    style: Option<&str>,
    numbering: Option<(isize, isize)>,
    runs: Runs,
) -> Paragraph<'static> {
    let mut p = Paragraph::default();
    if style.is_some() || numbering.is_some() {
        let mut property = ParagraphProperty::default();
        if let Some(style) = style {
            property = property.style_id(style.to_string());
        }
        if let Some((num_id, level)) = numbering {
            property = property.numbering(NumberingProperty::from((num_id, level.min(MAX_LEVEL))));
        }
        p = p.property(property);
    }
    for r in runs {
        p = p.push(r);
    }
    p
}

fn run(text: &str, fmt: Fmt) -> Option<Run<'static>> {
    if text.is_empty() {
        return None;
    }
    let mut run = Run::default();
    if let Some(property) = fmt.property() {
        run = run.property(property);
    }
    Some(run.push_text((text.to_string(), TextSpace::Preserve)))
}

fn line_break() -> Run<'static> {
    Run::default().push_break(None::<BreakType>)
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::docx::docx_to_markdown;
    use docx_rust::DocxFile;
    use std::io::Read;

    fn part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut s = String::new();
        file.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn package_has_required_parts() {
        let bytes = markdown_to_docx("# Title\n\nText", Some("My <Doc>")).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for required in [
            "[Content_Types].xml",
            "_rels/.rels",
            "word/document.xml",
            "word/styles.xml",
            "word/numbering.xml",
            "word/_rels/document.xml.rels",
            "docProps/core.xml",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
        assert!(!names.contains(&"docProps/app.xml"));

        let types = part(&bytes, "[Content_Types].xml");
        assert!(types.contains("/word/numbering.xml"), "got: {types}");
        assert!(!types.contains("/docProps/app.xml"), "got: {types}");

        let file = DocxFile::from_reader(Cursor::new(bytes.as_slice())).unwrap();
        let docx = file.parse().unwrap();
        match docx.core {
            Some(Core::CoreNamespace(core)) => {
                assert_eq!(core.title.as_deref(), Some("My <Doc>"));
                assert_eq!(core.creator.as_deref(), Some("textpress"));
            }
            other => panic!("expected namespaced core properties, got {other:?}"),
        }
    }

    #[test]
    fn document_xml_carries_styles_and_formatting() {
        let md = "## Section\n\nSome **bold**, *italic* and `code`.\n\n> quoted\n";
        let xml = part(&markdown_to_docx(md, None).unwrap(), "word/document.xml");
        assert!(xml.contains(r#"w:val="Heading2""#), "got: {xml}");
        assert!(xml.contains("<w:b"), "got: {xml}");
        assert!(xml.contains("<w:i"), "got: {xml}");
        assert!(xml.contains("Consolas"), "got: {xml}");
        assert!(xml.contains(r#"w:val="Quote""#), "got: {xml}");
    }

    #[test]
    fn styles_part_defines_every_used_style() {
        let bytes = markdown_to_docx("# T\n", None).unwrap();
        let file = DocxFile::from_reader(Cursor::new(bytes.as_slice())).unwrap();
        let docx = file.parse().unwrap();
        let ids: Vec<&str> = docx.styles.styles.iter().map(|s| s.style_id.as_ref()).collect();
        for id in [
            "Normal",
            "Heading1",
            "Heading6",
            "Quote",
            "Code",
            "ListParagraph",
            "TableGrid",
        ] {
            assert!(ids.contains(&id), "missing style {id}: {ids:?}");
        }
    }

    #[test]
    fn text_is_xml_escaped() {
        let xml = part(&markdown_to_docx("A & B < C", None).unwrap(), "word/document.xml");
        assert!(xml.contains("A &amp; B &lt; C"), "got: {xml}");
    }

    #[test]
    fn ordered_lists_restart_numbering() {
        let md = "1. one\n2. two\n\nbreak\n\n3. three\n";
        let bytes = markdown_to_docx(md, None).unwrap();
        let file = DocxFile::from_reader(Cursor::new(bytes.as_slice())).unwrap();
        let docx = file.parse().unwrap();
        let numbering = docx.numbering.expect("numbering part");

        let ids: Vec<Option<isize>> = numbering.numberings.iter().map(|n| n.num_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        let restart = &numbering.numberings[2];
        assert_eq!(
            restart.level_overrides[0]
                .start_override
                .as_ref()
                .and_then(|s| s.value),
            Some(3)
        );
        assert_eq!(
            numbering
                .numbering_details(3)
                .and_then(|a| a.levels[0].number_format.clone())
                .map(|f| f.value.to_string())
                .as_deref(),
            Some("decimal")
        );
    }

    #[test]
    fn reads_back_through_the_docx_reader() {
        let md = "# Report\n\nA **bold** claim.[^a]\n\n- first\n- second\n\n| k | v |\n| --- | --- |\n| x | 1 |\n\n[^a]: The source.\n";
        let bytes = markdown_to_docx(md, Some("Report")).unwrap();
        let back = docx_to_markdown(&bytes).unwrap().markdown;
        assert!(back.starts_with("# Report\n\nA **bold** claim.<sup>1</sup>"), "got: {back}");
        assert!(back.contains("- first\n- second"), "got: {back}");
        assert!(back.contains("| **k** | **v** |\n| --- | --- |\n| x | 1 |"), "got: {back}");
        assert!(back.contains("## Notes\n\n1. The source."), "got: {back}");
    }
}
