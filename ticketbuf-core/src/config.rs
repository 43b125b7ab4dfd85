/// Buffer rendering and reconciliation settings shared by the codec,
/// the change detector and the session layer.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Group never rendered (e.g. the state soft-deleted items land in).
    pub hidden_group: Option<String>,
    /// Label of the bucket for items with no group value.
    pub unknown_group: String,
    /// Closed buckets: rendered in snapshot order and never re-ranked.
    pub terminal_groups: Vec<String>,
    /// Repeating glyph sequence used for tree indentation.
    pub indent_glyph: String,
    /// Whitespace columns per tree level when the glyph is not used.
    pub indent_width: usize,
    pub rank_step: f64,
    pub default_item_type: String,
    /// Item types from the top of the hierarchy down.
    pub type_hierarchy: Vec<String>,
    /// Header label of the single tree-mode section.
    pub tree_section: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            hidden_group: Some("Removed".to_string()),
            unknown_group: "Unknown".to_string(),
            terminal_groups: vec!["Closed".to_string(), "Done".to_string(), "Removed".to_string()],
            indent_glyph: "│ ".to_string(),
            indent_width: 2,
            rank_step: 1000.0,
            default_item_type: "Task".to_string(),
            type_hierarchy: vec![
                "Epic".to_string(),
                "Feature".to_string(),
                "User Story".to_string(),
                "Task".to_string(),
            ],
            tree_section: "Hierarchy".to_string(),
        }
    }
}

impl BufferConfig {
    /// Map an empty group value onto the unknown bucket's label.
    pub fn canonical_group<'a>(&'a self, key: &'a str) -> &'a str {
        if key.trim().is_empty() {
            &self.unknown_group
        } else {
            key
        }
    }

    /// Two group keys name the same bucket. Empty and unknown compare equal.
    pub fn same_group(&self, a: &str, b: &str) -> bool {
        self.canonical_group(a) == self.canonical_group(b)
    }

    pub fn is_unknown_group(&self, key: &str) -> bool {
        self.canonical_group(key) == self.unknown_group
    }

    pub fn is_hidden(&self, key: &str) -> bool {
        self.hidden_group
            .as_deref()
            .is_some_and(|hidden| self.same_group(hidden, key))
    }

    /// Groups whose items are kept in rank order and may be re-ranked.
    pub fn is_rank_ordered(&self, key: &str) -> bool {
        !self.is_unknown_group(key)
            && !self
                .terminal_groups
                .iter()
                .any(|terminal| self.same_group(terminal, key))
    }

    /// The groups a buffer renders, in display order.
    pub fn visible_groups(&self, groups: &[String]) -> Vec<String> {
        groups
            .iter()
            .filter(|group| !self.is_hidden(group))
            .cloned()
            .collect()
    }

    /// The type a new item gets when created under a parent of `parent_type`.
    pub fn child_type(&self, parent_type: Option<&str>) -> String {
        let Some(parent_type) = parent_type else {
            return self.default_item_type.clone();
        };
        match self
            .type_hierarchy
            .iter()
            .position(|t| t.eq_ignore_ascii_case(parent_type))
        {
            Some(pos) => self
                .type_hierarchy
                .get(pos + 1)
                .or_else(|| self.type_hierarchy.last())
                .cloned()
                .unwrap_or_else(|| self.default_item_type.clone()),
            None => self.default_item_type.clone(),
        }
    }
}
