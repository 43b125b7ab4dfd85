use super::item_identity::normalize_title;
use super::rank;
use crate::config::BufferConfig;
use crate::parser::{is_rendered, LineKind, ParsedLine};
use crate::types::{Forest, GroupingMode, ItemId, Snapshot};
/// Change detection between a snapshot and an edited buffer.
///
/// Compares items by id (the `#<id>` marker on each line). Produces the
/// discrete changes an apply has to perform: created, deleted, retitled,
/// regrouped, reparented and re-ranked items. Structural problems are
/// reported next to the changes and must block the apply.
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Where a created or reparented item hangs in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParentRef {
    Root,
    Existing(ItemId),
    /// A draft on this buffer line; resolved once that draft is created.
    Pending(usize),
}

impl ParentRef {
    fn matches(self, parent: Option<ItemId>) -> bool {
        match (self, parent) {
            (ParentRef::Root, None) => true,
            (ParentRef::Existing(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// A single drift between the snapshot and the buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Change {
    Created {
        line: usize,
        title: String,
        item_type: String,
        /// Target group; `None` outside a section, in tree mode, or for the unknown bucket.
        group: Option<String>,
        depth: usize,
        parent: ParentRef,
    },
    TitleUpdated {
        id: ItemId,
        old_title: String,
        new_title: String,
    },
    Deleted {
        id: ItemId,
        title: String,
    },
    StateChanged {
        id: ItemId,
        old: String,
        new: String,
    },
    ColumnChanged {
        id: ItemId,
        old: String,
        new: String,
    },
    ParentChanged {
        id: ItemId,
        old_parent: Option<ItemId>,
        new_parent: ParentRef,
    },
    RankChanged {
        id: ItemId,
        old_rank: Option<f64>,
        new_rank: f64,
    },
}

impl Change {
    /// The existing item this change touches; `None` for creations.
    pub fn id(&self) -> Option<ItemId> {
        match self {
            Change::Created { .. } => None,
            Change::TitleUpdated { id, .. }
            | Change::Deleted { id, .. }
            | Change::StateChanged { id, .. }
            | Change::ColumnChanged { id, .. }
            | Change::ParentChanged { id, .. }
            | Change::RankChanged { id, .. } => Some(*id),
        }
    }
}

/// Structural problems that block an apply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectionError {
    #[error("line {line}: #{id} moved from depth {expected} to depth {found}; existing items cannot be re-indented")]
    Reindented {
        line: usize,
        id: ItemId,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: item at depth {depth} has no parent above it")]
    MissingParent { line: usize, depth: usize },
    #[error("line {line}: item at depth {depth} is indented more than one level below its parent (depth {parent_depth})")]
    TooDeep {
        line: usize,
        depth: usize,
        parent_depth: usize,
    },
    #[error("#{id} appears on line {first} and again on line {second}")]
    DuplicateItem { id: ItemId, first: usize, second: usize },
    #[error("line {line}: #{id} is not part of this buffer")]
    UnknownItem { line: usize, id: ItemId },
    #[error("line {line}: title of #{id} cannot be empty")]
    EmptyTitle { line: usize, id: ItemId },
}

/// Changes plus the structural errors found alongside them.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub changes: Vec<Change>,
    pub errors: Vec<DetectionError>,
}

impl Detection {
    pub fn is_blocked(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Resolved tree position of one buffer line.
#[derive(Debug, Clone, Copy)]
struct Placement {
    depth: usize,
    parent: Option<(usize, ParentRef)>,
}

/// Compute every change between `snapshot` and the decoded buffer.
///
/// `available_groups` are the groups the buffer rendered; snapshot items
/// outside them are never treated as deleted.
pub fn compute_changes(
    snapshot: &Snapshot,
    lines: &[ParsedLine],
    mode: GroupingMode,
    available_groups: &[String],
    config: &BufferConfig,
) -> Detection {
    let mut detection = Detection::default();
    let mut ordered: Vec<&ParsedLine> = lines.iter().collect();
    ordered.sort_by_key(|line| line.line_number);

    // First occurrence of every known id; later duplicates are reported and ignored.
    let mut seen: HashMap<ItemId, usize> = HashMap::new();
    let mut tracked: Vec<&ParsedLine> = Vec::new();
    for line in &ordered {
        let Some(id) = line.id() else { continue };
        if let Some(&first) = seen.get(&id) {
            detection.errors.push(DetectionError::DuplicateItem {
                id,
                first,
                second: line.line_number,
            });
            continue;
        }
        seen.insert(id, line.line_number);
        if !snapshot.contains(id) {
            detection.errors.push(DetectionError::UnknownItem {
                line: line.line_number,
                id,
            });
            continue;
        }
        tracked.push(line);
    }
    let tracked_lines: HashSet<usize> = tracked.iter().map(|line| line.line_number).collect();

    let forest = mode
        .is_tree()
        .then(|| snapshot.forest(|item| is_rendered(item, mode, available_groups, config)));
    let placements = if mode.is_tree() {
        place_lines(&ordered, &tracked_lines, &mut detection)
    } else {
        HashMap::new()
    };

    let mut created = Vec::new();
    let mut deleted = Vec::new();
    let mut updated = Vec::new();

    // Created
    let mut line_types: HashMap<usize, String> = HashMap::new();
    for line in &ordered {
        match &line.kind {
            LineKind::Existing { id, .. } if tracked_lines.contains(&line.line_number) => {
                if let Some(item) = snapshot.get(*id) {
                    line_types.insert(line.line_number, item.item_type.clone());
                }
            }
            LineKind::Draft { title } => {
                if normalize_title(title).is_empty() {
                    continue;
                }
                let (depth, parent) = match placements.get(&line.line_number) {
                    Some(placement) => match placement.parent {
                        Some((_, parent)) => (placement.depth, parent),
                        // Already reported by place_lines.
                        None if placement.depth > 0 => continue,
                        None => (0, ParentRef::Root),
                    },
                    None => (0, ParentRef::Root),
                };
                let parent_type = match parent {
                    ParentRef::Root => None,
                    ParentRef::Existing(id) => snapshot.get(id).map(|item| item.item_type.as_str()),
                    ParentRef::Pending(parent_line) => line_types.get(&parent_line).map(String::as_str),
                };
                let item_type = if mode.is_tree() {
                    config.child_type(parent_type)
                } else {
                    config.default_item_type.clone()
                };
                line_types.insert(line.line_number, item_type.clone());

                let group = if mode.is_tree() {
                    None
                } else {
                    line.group
                        .as_deref()
                        .filter(|group| !config.is_unknown_group(group))
                        .map(str::to_string)
                };
                created.push(Change::Created {
                    line: line.line_number,
                    title: title.clone(),
                    item_type,
                    group,
                    depth,
                    parent,
                });
            }
            _ => {}
        }
    }

    // Deleted
    for item in snapshot.items() {
        let Some(id) = item.id else { continue };
        if seen.contains_key(&id) {
            continue;
        }
        if !is_rendered(item, mode, available_groups, config) {
            continue;
        }
        deleted.push(Change::Deleted {
            id,
            title: item.title.clone(),
        });
    }

    // Title, group and parent per surviving item
    for line in &tracked {
        let Some(id) = line.id() else { continue };
        let Some(item) = snapshot.get(id) else { continue };
        let title = line.title().unwrap_or_default();

        let new_normalized = normalize_title(title);
        if new_normalized.is_empty() {
            detection.errors.push(DetectionError::EmptyTitle {
                line: line.line_number,
                id,
            });
        } else if new_normalized != normalize_title(&item.title) {
            updated.push(Change::TitleUpdated {
                id,
                old_title: item.title.clone(),
                new_title: title.to_string(),
            });
        }

        match (mode, line.group.as_deref()) {
            (GroupingMode::Tree, _) | (_, None) => {}
            (GroupingMode::State, Some(group)) => {
                if !config.same_group(&item.workflow_state, group) {
                    updated.push(Change::StateChanged {
                        id,
                        old: item.workflow_state.clone(),
                        new: group_value(group, config),
                    });
                }
            }
            (GroupingMode::BoardColumn, Some(group)) => {
                if !config.same_group(&item.board_column, group) {
                    updated.push(Change::ColumnChanged {
                        id,
                        old: item.board_column.clone(),
                        new: group_value(group, config),
                    });
                }
            }
        }

        if let (Some(forest), Some(placement)) = (&forest, placements.get(&line.line_number)) {
            if let Some(expected) = forest.depth(id) {
                if expected != placement.depth {
                    detection.errors.push(DetectionError::Reindented {
                        line: line.line_number,
                        id,
                        expected,
                        found: placement.depth,
                    });
                    continue;
                }
            }
            let Some((_, new_parent)) = placement.parent else { continue };
            let old_parent = if forest.contains(id) {
                forest.parent(id)
            } else {
                item.parent_id
            };
            if !new_parent.matches(old_parent) {
                updated.push(Change::ParentChanged {
                    id,
                    old_parent,
                    new_parent,
                });
            }
        }
    }

    let ranked = match &forest {
        Some(forest) => tree_rank_changes(snapshot, forest, &tracked, &placements, config),
        None => flat_rank_changes(snapshot, &tracked, mode, available_groups, config),
    };

    detection.changes.extend(created);
    detection.changes.extend(deleted);
    detection.changes.extend(updated);
    detection.changes.extend(ranked);

    log::debug!(
        "[ticketbuf.detect] {} change(s), {} error(s) across {} line(s)",
        detection.changes.len(),
        detection.errors.len(),
        lines.len()
    );
    detection
}

/// Server value for a buffer group header; the unknown bucket clears the field.
fn group_value(group: &str, config: &BufferConfig) -> String {
    if config.is_unknown_group(group) {
        String::new()
    } else {
        group.to_string()
    }
}

/// Resolve each item line's parent by indentation: the nearest line above
/// it at a shallower depth within the same section.
fn place_lines(
    ordered: &[&ParsedLine],
    tracked_lines: &HashSet<usize>,
    detection: &mut Detection,
) -> HashMap<usize, Placement> {
    let mut placements = HashMap::new();
    let mut stack: Vec<(usize, ParentRef)> = Vec::new();

    for line in ordered {
        let candidate = match &line.kind {
            LineKind::Header { .. } => {
                stack.clear();
                continue;
            }
            LineKind::Existing { id, .. } if tracked_lines.contains(&line.line_number) => {
                ParentRef::Existing(*id)
            }
            LineKind::Existing { .. } => continue,
            LineKind::Draft { .. } => ParentRef::Pending(line.line_number),
        };

        while stack.last().is_some_and(|(depth, _)| *depth >= line.depth) {
            stack.pop();
        }

        let parent = stack.last().copied();
        match parent {
            None if line.depth > 0 => detection.errors.push(DetectionError::MissingParent {
                line: line.line_number,
                depth: line.depth,
            }),
            Some((parent_depth, _)) if parent_depth + 1 < line.depth => {
                detection.errors.push(DetectionError::TooDeep {
                    line: line.line_number,
                    depth: line.depth,
                    parent_depth,
                })
            }
            _ => {}
        }

        let resolved = match parent {
            Some(found) => Some(found),
            None if line.depth == 0 => Some((0, ParentRef::Root)),
            None => None,
        };
        placements.insert(
            line.line_number,
            Placement {
                depth: line.depth,
                parent: resolved,
            },
        );
        stack.push((line.depth, candidate));
    }

    placements
}

fn flat_rank_changes(
    snapshot: &Snapshot,
    tracked: &[&ParsedLine],
    mode: GroupingMode,
    available_groups: &[String],
    config: &BufferConfig,
) -> Vec<Change> {
    let mut changes = Vec::new();

    for group in available_groups {
        if !config.is_rank_ordered(group) {
            continue;
        }

        let current: Vec<ItemId> = tracked
            .iter()
            .filter(|line| {
                line.group
                    .as_deref()
                    .is_some_and(|g| config.same_group(g, group))
            })
            .filter_map(|line| line.id())
            .collect();

        let mut members: Vec<_> = snapshot
            .items()
            .iter()
            .filter(|item| config.same_group(item.group_key(mode), group))
            .collect();
        members.sort_by(|a, b| a.rank_cmp(b));
        let original: Vec<ItemId> = members.iter().filter_map(|item| item.id).collect();

        push_rank_changes(snapshot, &original, &current, config, &mut changes);
    }

    changes
}

fn tree_rank_changes(
    snapshot: &Snapshot,
    forest: &Forest,
    tracked: &[&ParsedLine],
    placements: &HashMap<usize, Placement>,
    config: &BufferConfig,
) -> Vec<Change> {
    let mut order: Vec<ParentRef> = Vec::new();
    let mut current: HashMap<ParentRef, Vec<ItemId>> = HashMap::new();
    for line in tracked {
        let Some(id) = line.id() else { continue };
        let Some((_, parent)) = placements.get(&line.line_number).and_then(|p| p.parent) else {
            continue;
        };
        if !current.contains_key(&parent) {
            order.push(parent);
        }
        current.entry(parent).or_default().push(id);
    }

    let mut changes = Vec::new();
    for parent in order {
        let original: Vec<ItemId> = match parent {
            ParentRef::Root => sibling_set(forest, None),
            ParentRef::Existing(id) => sibling_set(forest, Some(id)),
            ParentRef::Pending(_) => Vec::new(),
        };
        let siblings = current.get(&parent).map(Vec::as_slice).unwrap_or_default();
        push_rank_changes(snapshot, &original, siblings, config, &mut changes);
    }
    changes
}

fn sibling_set(forest: &Forest, parent: Option<ItemId>) -> Vec<ItemId> {
    forest
        .sibling_groups()
        .iter()
        .find(|(p, _)| *p == parent)
        .map(|(_, ids)| ids.clone())
        .unwrap_or_default()
}

fn push_rank_changes(
    snapshot: &Snapshot,
    original: &[ItemId],
    current: &[ItemId],
    config: &BufferConfig,
    changes: &mut Vec<Change>,
) {
    let rank_of = |id: ItemId| snapshot.get(id).and_then(|item| item.priority_rank);
    for (id, new_rank) in rank::rerank(original, current, rank_of, config.rank_step) {
        let old_rank = rank_of(id);
        if old_rank != Some(new_rank) {
            changes.push(Change::RankChanged {
                id,
                old_rank,
                new_rank,
            });
        }
    }
}
