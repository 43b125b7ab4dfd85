use regex::Regex;
/// Item identity on buffer lines.
///
/// An existing item is rendered as `<type> #<id> | <title>`. The type tag in
/// front of the marker is decoration only; identity is the `#<id> |` marker.
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

use crate::types::ItemId;

static ITEM_REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)\s*\|").unwrap());

static BARE_REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\d+\s*$").unwrap());

/// Extract `(id, title)` from an item line. The title is trimmed but not
/// collapsed, since it becomes the new server value verbatim.
pub fn extract_item_ref(text: &str) -> Option<(ItemId, &str)> {
    let caps = ITEM_REF_RE.captures(text)?;
    let marker = caps.get(0)?;
    let id = caps[1].parse::<ItemId>().ok()?;
    Some((id, text[marker.end()..].trim()))
}

/// A `#123` reference with no `| title` after it. Such lines are neither
/// items nor drafts.
pub fn is_bare_ref(text: &str) -> bool {
    !text.contains('|') && BARE_REF_RE.is_match(text)
}

/// Comparison form of a title: NFC, trimmed, whitespace runs collapsed.
pub fn normalize_title(title: &str) -> String {
    let composed: String = title.nfc().collect();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render an item line body (without indentation).
pub fn format_item_line(item_type: &str, id: ItemId, title: &str) -> String {
    let title = title.replace("\r\n", " ").replace(['\n', '\r'], " ");
    let item_type = item_type.trim();
    if item_type.is_empty() {
        format!("#{} | {}", id, title.trim())
    } else {
        format!("{} #{} | {}", item_type, id, title.trim())
    }
}
