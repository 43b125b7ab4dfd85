/// Board column picks made outside the buffer text (e.g. a column picker
/// in the editor), versioned by the editor's undo sequence number.
///
/// The log is append-only. Undoing in the editor moves the sequence back,
/// which makes an earlier entry current again without losing later ones.
use std::collections::HashMap;

use crate::types::ItemId;

#[derive(Debug, Clone, Default)]
pub struct ColumnOverrideLog {
    entries: Vec<(u64, HashMap<ItemId, String>)>,
}

impl ColumnOverrideLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full override set as of `seq`. Entries are kept sorted by
    /// sequence; recording an existing sequence replaces that entry.
    pub fn record(&mut self, seq: u64, overrides: HashMap<ItemId, String>) {
        match self.entries.binary_search_by_key(&seq, |(s, _)| *s) {
            Ok(pos) => self.entries[pos].1 = overrides,
            Err(pos) => self.entries.insert(pos, (seq, overrides)),
        }
    }

    /// Most recent override set at or before `seq`.
    pub fn at(&self, seq: u64) -> Option<&HashMap<ItemId, String>> {
        self.entries
            .iter()
            .rev()
            .find(|(s, _)| *s <= seq)
            .map(|(_, overrides)| overrides)
    }

    /// Override set at the newest sequence.
    pub fn latest(&self) -> Option<&HashMap<ItemId, String>> {
        self.entries.last().map(|(_, overrides)| overrides)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
