//! Deterministic Markdown cleanups.
//!
//! Converters hand back Markdown with the quirks of their source: CRLF line
//! endings from Word, zero-width characters from Google Docs, runs of blank
//! lines where empty paragraphs were, and (for Gemini Deep Research reports)
//! numbered superscripts instead of footnotes plus a "Works cited" heading at
//! whatever level the exporter felt like.
//!
//! Each rule is a pure `&str → String` function. Rules that inspect lines
//! skip fenced code blocks so a `# comment` inside a shell snippet is never
//! taken for a heading.
//!
//! Rule sets:
//! - [`clean_markdown`]: whitespace normalisation applied to every
//!   converter's output.
//! - [`docx_cleanups`]: footnotes, then Works Cited, then
//!   [`clean_markdown`]. Only for docx input.
//! - [`reformat_markdown`]: everything in [`clean_markdown`] plus heading
//!   spacing and GFM table repair, used by the `reformat` command.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};

/// A numbered note collected from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endnote {
    pub number: u32,
    pub text: String,
}

/// Whitespace normalisation:
/// 1. CRLF / CR → LF
/// 2. strip invisible Unicode (zero-width space, BOM, soft hyphen, joiners)
/// 3. trim trailing whitespace per line (outside code fences)
/// 4. collapse runs of blank lines to one (outside code fences)
/// 5. exactly one final newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

/// Cleanups for Markdown produced from a `.docx`, in order:
/// footnotes from endnotes, Works Cited heading, whitespace.
pub fn docx_cleanups(markdown: &str, notes: &[Endnote]) -> String {
    let s = normalise_line_endings(markdown);
    let s = endnotes_to_footnotes(&s, notes);
    let s = normalize_works_cited(&s);
    clean_markdown(&s)
}

/// Full reformat used by the `reformat` command.
pub fn reformat_markdown(input: &str) -> String {
    let s = clean_markdown(input);
    let s = normalise_heading_spacing(&s);
    let s = fix_broken_tables(&s);
    let s = remove_mid_table_separators(&s);
    ensure_final_newline(&s)
}

// ── Line classification ──────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}(```+|~~~+)").unwrap());

/// Pair each line with whether it is inside (or delimits) a fenced code block.
fn lines_with_fence_state(input: &str) -> Vec<(&str, bool)> {
    let mut open: Option<String> = None;
    input
        .split('\n')
        .map(|line| {
            if let Some(caps) = RE_FENCE.captures(line) {
                let marker = &caps[1];
                let closes = matches!(&open, Some(m) if marker.starts_with(m.as_str()));
                if open.is_none() {
                    open = Some(marker.to_string());
                } else if closes {
                    open = None;
                }
                (line, true)
            } else {
                (line, open.is_some())
            }
        })
        .collect()
}

// ── Whitespace rules ─────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    lines_with_fence_state(input)
        .into_iter()
        .map(|(line, in_code)| if in_code { line } else { line.trim_end() })
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_blank_lines(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous_blank = false;
    for (line, in_code) in lines_with_fence_state(input) {
        let blank = !in_code && line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        out.push(line);
    }
    out.join("\n")
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_matches('\n').trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Footnotes ────────────────────────────────────────────────────────────────

static RE_SUP_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<sup>\s*(\d+(?:\s*,\s*\d+)*)\s*</sup>").unwrap()
});

static RE_REFERENCES_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^ {0,3}#{1,6}[ \t]+(works[ \t]+cited|references|sources|citations|endnotes|notes|bibliography)[ \t]*:?[ \t]*#*[ \t]*$",
    )
    .unwrap()
});

static RE_NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(\d+)[.)][ \t]+(.*)$").unwrap());

/// Turn numbered superscript markers into footnote references.
///
/// `<sup>3</sup>` becomes `[^3]` and `<sup>1, 2</sup>` becomes `[^1][^2]`
/// when every number has a note. Markers naming an unknown note are left
/// alone.
///
/// Notes come from `notes` (the document's endnote part) when non-empty; a
/// `[^N]: text` definition is appended for each referenced note, in note
/// order. Otherwise the last numbered list under a references heading
/// ("Works cited", "References", ...) is used, and its referenced items are
/// rewritten in place as definitions.
pub fn endnotes_to_footnotes(markdown: &str, notes: &[Endnote]) -> String {
    if !notes.is_empty() {
        let known: HashMap<u32, &str> = notes.iter().map(|n| (n.number, n.text.as_str())).collect();
        let (body, used) = replace_markers(markdown, |n| known.contains_key(&n));
        if used.is_empty() {
            return body;
        }
        let mut out = body.trim_end().to_string();
        out.push_str("\n\n");
        for note in notes.iter().filter(|n| used.contains(&n.number)) {
            out.push_str(&format!("[^{}]: {}\n", note.number, note.text.trim()));
        }
        return out;
    }

    let lines: Vec<&str> = markdown.split('\n').collect();
    let Some(list) = find_reference_list(&lines) else {
        return markdown.to_string();
    };

    let known: HashMap<u32, usize> = list.items.iter().map(|i| (i.number, i.line)).collect();
    let head = lines[..list.heading_line].join("\n");
    let (head, used) = replace_markers(&head, |n| known.contains_key(&n));

    let mut out: Vec<String> = vec![head];
    let mut skip: BTreeSet<usize> = BTreeSet::new();
    let mut rewritten: HashMap<usize, String> = HashMap::new();
    for item in list.items.iter().filter(|i| used.contains(&i.number)) {
        rewritten.insert(item.line, format!("[^{}]: {}", item.number, item.text));
        skip.extend(item.continuation.iter().copied());
    }
    for (idx, line) in lines.iter().enumerate().skip(list.heading_line) {
        if skip.contains(&idx) {
            continue;
        }
        match rewritten.remove(&idx) {
            Some(def) => out.push(def),
            None => out.push((*line).to_string()),
        }
    }
    out.join("\n")
}

/// Replace superscript markers whose numbers all satisfy `known`, returning
/// the new text and the set of referenced numbers.
fn replace_markers(text: &str, known: impl Fn(u32) -> bool) -> (String, BTreeSet<u32>) {
    let mut used = BTreeSet::new();
    let replaced = RE_SUP_MARKER.replace_all(text, |caps: &Captures<'_>| {
        let numbers: Vec<u32> = caps[1]
            .split(',')
            .filter_map(|n| n.trim().parse().ok())
            .collect();
        if numbers.is_empty() || !numbers.iter().all(|&n| known(n)) {
            return caps[0].to_string();
        }
        used.extend(numbers.iter().copied());
        numbers.iter().map(|n| format!("[^{n}]")).collect::<String>()
    });
    (replaced.into_owned(), used)
}

struct ReferenceList {
    heading_line: usize,
    items: Vec<ListedNote>,
}

struct ListedNote {
    number: u32,
    line: usize,
    text: String,
    continuation: Vec<usize>,
}

/// The numbered list following the last references heading.
fn find_reference_list(lines: &[&str]) -> Option<ReferenceList> {
    let joined = lines.join("\n");
    let fenced = lines_with_fence_state(&joined);
    let heading_line = (0..lines.len())
        .rev()
        .find(|&i| !fenced[i].1 && RE_REFERENCES_HEADING.is_match(lines[i]))?;

    let mut items: Vec<ListedNote> = Vec::new();
    for (idx, line) in lines.iter().enumerate().skip(heading_line + 1) {
        if let Some(caps) = RE_NUMBERED_ITEM.captures(line) {
            let Ok(number) = caps[1].parse() else { break };
            items.push(ListedNote {
                number,
                line: idx,
                text: caps[2].trim().to_string(),
                continuation: Vec::new(),
            });
        } else if line.trim().is_empty() {
            continue;
        } else if line.starts_with("   ") || line.starts_with('\t') {
            // Indented continuation of the previous item.
            let Some(last) = items.last_mut() else { break };
            last.text.push(' ');
            last.text.push_str(line.trim());
            last.continuation.push(idx);
        } else {
            break;
        }
    }

    if items.is_empty() {
        None
    } else {
        Some(ReferenceList {
            heading_line,
            items,
        })
    }
}

// ── Works Cited heading ──────────────────────────────────────────────────────

static RE_WORKS_CITED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ {0,3}#{1,6}[ \t]+works[ \t]+cited[ \t]*:?[ \t]*#*[ \t]*$").unwrap()
});

/// Any heading reading "works cited" (any case, level 1-6) becomes
/// `## Works Cited`. Lines inside code fences are left alone.
pub fn normalize_works_cited(markdown: &str) -> String {
    lines_with_fence_state(markdown)
        .into_iter()
        .map(|(line, in_code)| {
            if !in_code && RE_WORKS_CITED.is_match(line) {
                "## Works Cited"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Reformat rules ───────────────────────────────────────────────────────────

static RE_HEADING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}#{1,6}([ \t]|$)").unwrap());

/// Blank line before and after every heading.
fn normalise_heading_spacing(input: &str) -> String {
    let lines = lines_with_fence_state(input);
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 16);
    let mut after_heading = false;
    for (line, in_code) in lines {
        let is_heading = !in_code && RE_HEADING_LINE.is_match(line);
        let needs_gap = (is_heading || after_heading) && !line.trim().is_empty();
        if needs_gap && out.last().is_some_and(|l| !l.trim().is_empty()) {
            out.push("");
        }
        out.push(line);
        after_heading = is_heading;
    }
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    is_table_row(trimmed)
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Insert a separator row after a table header that lacks one.
fn fix_broken_tables(input: &str) -> String {
    let lines = lines_with_fence_state(input);
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut previous_is_row = false;
    for (i, &(line, in_code)) in lines.iter().enumerate() {
        out.push(line.to_string());
        let row = !in_code && is_table_row(line);
        let starts_table = row && !previous_is_row && !is_separator_row(line);
        if starts_table {
            let next = lines.get(i + 1).map(|&(l, _)| l).unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let columns = line.trim().matches('|').count().saturating_sub(1).max(1);
                let sep: String = std::iter::once("|")
                    .chain(std::iter::repeat(" --- |").take(columns))
                    .collect();
                out.push(sep);
            }
        }
        previous_is_row = row;
    }
    out.join("\n")
}

/// GFM allows a separator only as a table's second row; drop the rest.
fn remove_mid_table_separators(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut row_index = 0usize;
    for (line, in_code) in lines_with_fence_state(input) {
        if !in_code && is_table_row(line) {
            row_index += 1;
            if is_separator_row(line) && row_index != 2 {
                continue;
            }
        } else {
            row_index = 0;
        }
        out.push(line);
    }
    out.join("\n")
}
