/// Buffer codec for work item lists.
///
/// Handles the editable format:
///   === New ===
///   Bug #12 | Crash on save
///   Task #14 | Write docs
///
///   === Active ===
///   Task #9 | Review pipeline
///
/// Tree buffers render one section and indent children with a repeating
/// glyph (or plain whitespace when typed by hand):
///   === Hierarchy ===
///   Epic #1 | Checkout
///   │ Feature #2 | Saved carts
///   │ │ Task #3 | Persist cart id
use serde::Serialize;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::BufferConfig;
use crate::merge::item_identity;
use crate::types::{GroupingMode, Item, ItemId, Snapshot};

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^=== (.*?) ===$").unwrap());

/// One decoded buffer line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLine {
    /// 1-based line number in the buffer.
    pub line_number: usize,
    /// Most recent section header above this line.
    pub group: Option<String>,
    /// Tree indentation level; always computed, only meaningful in tree mode.
    pub depth: usize,
    pub kind: LineKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LineKind {
    Header { group: String },
    Existing { id: ItemId, title: String },
    Draft { title: String },
}

impl ParsedLine {
    pub fn id(&self) -> Option<ItemId> {
        match &self.kind {
            LineKind::Existing { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match &self.kind {
            LineKind::Existing { title, .. } | LineKind::Draft { title } => Some(title),
            LineKind::Header { .. } => None,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self.kind, LineKind::Header { .. })
    }
}

pub fn format_header(group: &str) -> String {
    format!("=== {} ===", group)
}

pub fn extract_header(line: &str) -> Option<&str> {
    HEADER_RE
        .captures(line.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether a buffer of this mode and group list renders the item at all.
/// `available_groups` are the visible groups (hidden group already removed).
pub fn is_rendered(
    item: &Item,
    mode: GroupingMode,
    available_groups: &[String],
    config: &BufferConfig,
) -> bool {
    let key = item.group_key(mode);
    available_groups.iter().any(|group| config.same_group(group, key))
}

/// Render a snapshot into buffer lines.
pub fn generate_lines(
    snapshot: &Snapshot,
    mode: GroupingMode,
    groups: &[String],
    config: &BufferConfig,
) -> Vec<String> {
    let visible = config.visible_groups(groups);
    let mut lines = Vec::new();

    if mode.is_tree() {
        let forest = snapshot.forest(|item| is_rendered(item, mode, &visible, config));
        lines.push(format_header(&config.tree_section));
        for &id in forest.order() {
            let Some(item) = snapshot.get(id) else { continue };
            let depth = forest.depth(id).unwrap_or(0);
            lines.push(format!(
                "{}{}",
                config.indent_glyph.repeat(depth),
                item_identity::format_item_line(&item.item_type, id, &item.title)
            ));
        }
        lines.push(String::new());
        return lines;
    }

    for group in &visible {
        lines.push(format_header(config.canonical_group(group)));
        let mut members: Vec<&Item> = snapshot
            .items()
            .iter()
            .filter(|item| config.same_group(item.group_key(mode), group))
            .collect();
        if config.is_rank_ordered(group) {
            members.sort_by(|a, b| a.rank_cmp(b));
        }
        for item in members {
            if let Some(id) = item.id {
                lines.push(item_identity::format_item_line(&item.item_type, id, &item.title));
            }
        }
        lines.push(String::new());
    }

    lines
}

pub fn generate_buffer(
    snapshot: &Snapshot,
    mode: GroupingMode,
    groups: &[String],
    config: &BufferConfig,
) -> String {
    generate_lines(snapshot, mode, groups, config).join("\n")
}

/// Decode edited buffer text. Blank lines and bare `#123` references are
/// dropped; everything else is a header, an existing item or a draft.
pub fn parse_buffer(text: &str, config: &BufferConfig) -> Vec<ParsedLine> {
    let content = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut parsed = Vec::new();
    let mut group: Option<String> = None;

    for (index, line) in content.split('\n').enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        if let Some(header) = extract_header(line) {
            group = Some(header.to_string());
            parsed.push(ParsedLine {
                line_number,
                group: group.clone(),
                depth: 0,
                kind: LineKind::Header {
                    group: header.to_string(),
                },
            });
            continue;
        }

        let (depth, body) = measure_depth(line, config);
        let body = body.trim();
        if body.is_empty() {
            continue;
        }

        let kind = if let Some((id, title)) = item_identity::extract_item_ref(body) {
            LineKind::Existing {
                id,
                title: title.to_string(),
            }
        } else if item_identity::is_bare_ref(body) {
            log::debug!("[ticketbuf.parser] Ignoring bare reference on line {}", line_number);
            continue;
        } else {
            LineKind::Draft {
                title: body.to_string(),
            }
        };

        parsed.push(ParsedLine {
            line_number,
            group: group.clone(),
            depth,
            kind,
        });
    }

    parsed
}

/// Indentation depth of a line and the text after the indentation.
/// The glyph sequence wins when present; otherwise leading whitespace is
/// measured in `indent_width` columns (a tab counts as one full level).
fn measure_depth<'a>(line: &'a str, config: &BufferConfig) -> (usize, &'a str) {
    let glyph = config.indent_glyph.as_str();
    if !glyph.is_empty() {
        let mut rest = line;
        let mut depth = 0;
        while let Some(stripped) = rest.strip_prefix(glyph) {
            depth += 1;
            rest = stripped;
        }
        if depth > 0 {
            return (depth, rest);
        }
    }

    let width = config.indent_width.max(1);
    let mut columns = 0;
    let mut offset = 0;
    for ch in line.chars() {
        match ch {
            ' ' => columns += 1,
            '\t' => columns += width,
            _ => break,
        }
        offset += ch.len_utf8();
    }
    (columns / width, &line[offset..])
}
