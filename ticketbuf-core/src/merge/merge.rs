/// Per-item merge of detected changes into single field patches.
///
/// Every field change for one id (title, group, rank) plus any out-of-band
/// edits from side editors collapses into one `FieldPatch`, so an apply
/// sends at most one field mutation per item. Later values overwrite
/// earlier ones for the same field.
///
/// Not merged:
/// - Created / Deleted: structurally different operations
/// - ParentChanged: relations go through their own request shape
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::diff::Change;
use crate::types::ItemId;

/// Field values to write on one existing item. `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_rank: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.state.is_none()
            && self.board_column.is_none()
            && self.priority_rank.is_none()
            && self.description.is_none()
            && self.tags.is_none()
    }

    /// Overlay `other` on top of this patch; set fields in `other` win.
    pub fn absorb(&mut self, other: FieldPatch) {
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.state.is_some() {
            self.state = other.state;
        }
        if other.board_column.is_some() {
            self.board_column = other.board_column;
        }
        if other.priority_rank.is_some() {
            self.priority_rank = other.priority_rank;
        }
        if other.description.is_some() {
            self.description = other.description;
        }
        if other.tags.is_some() {
            self.tags = other.tags;
        }
    }
}

/// An edit captured outside the buffer text (description pane, tag picker,
/// column override).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxEdit {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub board_column: Option<String>,
}

impl From<AuxEdit> for FieldPatch {
    fn from(edit: AuxEdit) -> Self {
        FieldPatch {
            description: edit.description,
            tags: edit.tags,
            board_column: edit.board_column,
            ..FieldPatch::default()
        }
    }
}

/// Fold changes and auxiliary edits into one patch per item.
///
/// Aux edits are applied after the buffer changes. Items being deleted in
/// the same pass get no patch.
pub fn merge_changes(
    changes: &[Change],
    aux: &BTreeMap<ItemId, AuxEdit>,
) -> BTreeMap<ItemId, FieldPatch> {
    let deleted: HashSet<ItemId> = changes
        .iter()
        .filter_map(|change| match change {
            Change::Deleted { id, .. } => Some(*id),
            _ => None,
        })
        .collect();

    let mut merged: BTreeMap<ItemId, FieldPatch> = BTreeMap::new();
    for change in changes {
        let (id, patch) = match change {
            Change::TitleUpdated { id, new_title, .. } => (
                *id,
                FieldPatch {
                    title: Some(new_title.clone()),
                    ..FieldPatch::default()
                },
            ),
            Change::StateChanged { id, new, .. } => (
                *id,
                FieldPatch {
                    state: Some(new.clone()),
                    ..FieldPatch::default()
                },
            ),
            Change::ColumnChanged { id, new, .. } => (
                *id,
                FieldPatch {
                    board_column: Some(new.clone()),
                    ..FieldPatch::default()
                },
            ),
            Change::RankChanged { id, new_rank, .. } => (
                *id,
                FieldPatch {
                    priority_rank: Some(*new_rank),
                    ..FieldPatch::default()
                },
            ),
            Change::Created { .. } | Change::Deleted { .. } | Change::ParentChanged { .. } => continue,
        };
        if deleted.contains(&id) {
            continue;
        }
        merged.entry(id).or_default().absorb(patch);
    }

    for (id, edit) in aux {
        if deleted.contains(id) {
            log::debug!("[ticketbuf.merge] Dropping side edit for #{} deleted in this pass", id);
            continue;
        }
        merged.entry(*id).or_default().absorb(edit.clone().into());
    }

    merged.retain(|_, patch| !patch.is_empty());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::diff::ParentRef;

    fn rename(id: ItemId, title: &str) -> Change {
        Change::TitleUpdated {
            id,
            old_title: "old".to_string(),
            new_title: title.to_string(),
        }
    }

    #[test]
    fn test_merge_collapses_fields_per_item() {
        let changes = vec![
            rename(1, "New title"),
            Change::StateChanged {
                id: 1,
                old: "New".to_string(),
                new: "Active".to_string(),
            },
            Change::RankChanged {
                id: 1,
                old_rank: Some(1.0),
                new_rank: 2.0,
            },
            rename(2, "Other"),
        ];
        let merged = merge_changes(&changes, &BTreeMap::new());
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged[&1],
            FieldPatch {
                title: Some("New title".to_string()),
                state: Some("Active".to_string()),
                priority_rank: Some(2.0),
                ..FieldPatch::default()
            }
        );
    }

    #[test]
    fn test_merge_skips_structural_changes() {
        let changes = vec![
            Change::Created {
                line: 3,
                title: "draft".to_string(),
                item_type: "Task".to_string(),
                group: None,
                depth: 0,
                parent: ParentRef::Root,
            },
            Change::ParentChanged {
                id: 4,
                old_parent: None,
                new_parent: ParentRef::Existing(1),
            },
        ];
        assert!(merge_changes(&changes, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_aux_edits_fold_last() {
        let changes = vec![
            rename(1, "Title"),
            Change::ColumnChanged {
                id: 1,
                old: "Doing".to_string(),
                new: "Review".to_string(),
            },
        ];
        let mut aux = BTreeMap::new();
        aux.insert(
            1,
            AuxEdit {
                description: Some("details".to_string()),
                board_column: Some("Done".to_string()),
                ..AuxEdit::default()
            },
        );
        aux.insert(
            5,
            AuxEdit {
                tags: Some(vec!["infra".to_string()]),
                ..AuxEdit::default()
            },
        );
        let merged = merge_changes(&changes, &aux);
        assert_eq!(merged[&1].board_column.as_deref(), Some("Done"));
        assert_eq!(merged[&1].description.as_deref(), Some("details"));
        assert_eq!(merged[&1].title.as_deref(), Some("Title"));
        assert_eq!(merged[&5].tags, Some(vec!["infra".to_string()]));
    }

    #[test]
    fn test_deleted_items_get_no_patch() {
        let changes = vec![
            Change::Deleted {
                id: 1,
                title: "gone".to_string(),
            },
            rename(1, "too late"),
        ];
        let mut aux = BTreeMap::new();
        aux.insert(1, AuxEdit::default());
        assert!(merge_changes(&changes, &aux).is_empty());
    }

    #[test]
    fn test_empty_aux_edit_is_dropped() {
        let mut aux = BTreeMap::new();
        aux.insert(9, AuxEdit::default());
        assert!(merge_changes(&[], &aux).is_empty());
    }
}
