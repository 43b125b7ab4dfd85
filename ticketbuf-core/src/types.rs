use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Server-side identifier of a work item.
pub type ItemId = u64;

/// A trackable unit of work as the tracker reports it.
///
/// `id` is `None` only for drafts that exist in an edited buffer and have
/// not been created yet; everything inside a [`Snapshot`] is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    /// Opaque server revision token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub workflow_state: String,
    /// Empty when the item has not been placed on a board yet.
    #[serde(default)]
    pub board_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_rank: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub iteration: String,
}

impl Item {
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// The value this item is bucketed by in a buffer of the given mode.
    /// Tree buffers filter by workflow state.
    pub fn group_key(&self, mode: GroupingMode) -> &str {
        match mode {
            GroupingMode::State | GroupingMode::Tree => &self.workflow_state,
            GroupingMode::BoardColumn => &self.board_column,
        }
    }

    /// Display order inside a ranked group: ranked before unranked, lower
    /// rank first, ties broken by ascending id.
    pub fn rank_cmp(&self, other: &Item) -> Ordering {
        compare_rank(self.priority_rank, other.priority_rank).then_with(|| self.id.cmp(&other.id))
    }
}

fn compare_rank(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// How a buffer buckets its items into sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupingMode {
    /// One section per workflow state.
    State,
    /// One section per board column.
    BoardColumn,
    /// A single section showing the parent/child hierarchy by indentation.
    Tree,
}

impl GroupingMode {
    pub fn is_tree(self) -> bool {
        matches!(self, GroupingMode::Tree)
    }
}

/// Immutable server state captured when a buffer was opened or refreshed.
///
/// Never patched in place: a refresh builds a new one and the session swaps it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    items: Vec<Item>,
    index: HashMap<ItemId, usize>,
    children: HashMap<ItemId, Vec<ItemId>>,
    fetched_at: DateTime<Local>,
}

impl Snapshot {
    pub fn new(items: Vec<Item>) -> Self {
        let mut kept = Vec::with_capacity(items.len());
        let mut index = HashMap::new();
        for item in items {
            let Some(id) = item.id else {
                log::warn!("[ticketbuf.snapshot] Dropping item without id: {}", item.title);
                continue;
            };
            if index.contains_key(&id) {
                log::warn!("[ticketbuf.snapshot] Duplicate item #{} in fetch result", id);
                continue;
            }
            index.insert(id, kept.len());
            kept.push(item);
        }

        let mut children: HashMap<ItemId, Vec<ItemId>> = HashMap::new();
        for item in &kept {
            if let (Some(id), Some(parent)) = (item.id, item.parent_id) {
                if index.contains_key(&parent) {
                    children.entry(parent).or_default().push(id);
                }
            }
        }

        Self {
            items: kept,
            index,
            children,
            fetched_at: Local::now(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.index.get(&id).map(|&i| &self.items[i])
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().filter_map(|item| item.id).collect()
    }

    /// Parent→child edges among items present in this snapshot.
    pub fn children_of(&self, id: ItemId) -> &[ItemId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fetched_at(&self) -> DateTime<Local> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lay out the visible items as a forest. An item whose parent is not
    /// visible becomes a root; siblings are rank ordered.
    pub fn forest(&self, visible: impl Fn(&Item) -> bool) -> Forest {
        let shown: HashSet<ItemId> = self
            .items
            .iter()
            .filter(|item| visible(item))
            .filter_map(|item| item.id)
            .collect();

        let mut kids: HashMap<Option<ItemId>, Vec<&Item>> = HashMap::new();
        for item in &self.items {
            let Some(id) = item.id else { continue };
            if !shown.contains(&id) {
                continue;
            }
            let parent = item.parent_id.filter(|p| shown.contains(p) && *p != id);
            kids.entry(parent).or_default().push(item);
        }
        for list in kids.values_mut() {
            list.sort_by(|a, b| a.rank_cmp(b));
        }

        let mut forest = Forest::default();
        let mut visited = HashSet::new();
        let roots: Vec<ItemId> = kids
            .get(&None)
            .map(|list| list.iter().filter_map(|item| item.id).collect())
            .unwrap_or_default();
        forest.siblings.push((None, roots.clone()));
        for root in roots {
            forest.walk(root, None, 0, &kids, &mut visited);
        }

        // Parent cycles leave items unreachable from any root; surface them as roots.
        for item in &self.items {
            let Some(id) = item.id else { continue };
            if shown.contains(&id) && !visited.contains(&id) {
                log::warn!("[ticketbuf.snapshot] Item #{} sits in a parent cycle, shown as root", id);
                if let Some((_, roots)) = forest.siblings.first_mut() {
                    roots.push(id);
                }
                forest.walk(id, None, 0, &kids, &mut visited);
            }
        }

        forest
    }
}

/// Tree layout of a snapshot's visible items.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    order: Vec<ItemId>,
    placement: HashMap<ItemId, (usize, Option<ItemId>)>,
    siblings: Vec<(Option<ItemId>, Vec<ItemId>)>,
}

impl Forest {
    fn walk(
        &mut self,
        id: ItemId,
        parent: Option<ItemId>,
        depth: usize,
        kids: &HashMap<Option<ItemId>, Vec<&Item>>,
        visited: &mut HashSet<ItemId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        self.order.push(id);
        self.placement.insert(id, (depth, parent));
        let children: Vec<ItemId> = kids
            .get(&Some(id))
            .map(|list| {
                list.iter()
                    .filter_map(|item| item.id)
                    .filter(|child| !visited.contains(child))
                    .collect()
            })
            .unwrap_or_default();
        if children.is_empty() {
            return;
        }
        self.siblings.push((Some(id), children.clone()));
        for child in children {
            self.walk(child, Some(id), depth + 1, kids, visited);
        }
    }

    /// Visible ids in pre-order (the order they are rendered in).
    pub fn order(&self) -> &[ItemId] {
        &self.order
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.placement.contains_key(&id)
    }

    pub fn depth(&self, id: ItemId) -> Option<usize> {
        self.placement.get(&id).map(|(depth, _)| *depth)
    }

    /// Effective parent inside the layout; `None` for roots.
    pub fn parent(&self, id: ItemId) -> Option<ItemId> {
        self.placement.get(&id).and_then(|(_, parent)| *parent)
    }

    /// Sibling sets keyed by parent, roots first, then parents in pre-order.
    pub fn sibling_groups(&self) -> &[(Option<ItemId>, Vec<ItemId>)] {
        &self.siblings
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn item(id: ItemId, title: &str, state: &str, rank: Option<f64>) -> Item {
        Item {
            id: Some(id),
            revision: Some(1),
            title: title.to_string(),
            item_type: "Task".to_string(),
            workflow_state: state.to_string(),
            priority_rank: rank,
            ..Item::default()
        }
    }

    pub(crate) fn child(id: ItemId, title: &str, parent: Option<ItemId>, rank: Option<f64>) -> Item {
        Item {
            parent_id: parent,
            ..item(id, title, "Active", rank)
        }
    }

    #[test]
    fn test_rank_cmp_unranked_last_then_id() {
        let a = item(3, "a", "New", Some(50.0));
        let b = item(1, "b", "New", None);
        let c = item(2, "c", "New", None);
        let d = item(4, "d", "New", Some(50.0));
        let mut items = vec![b.clone(), d.clone(), c.clone(), a.clone()];
        items.sort_by(|x, y| x.rank_cmp(y));
        let ids: Vec<_> = items.iter().map(|i| i.id.unwrap()).collect();
        assert_eq!(ids, vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_snapshot_drops_unpersisted_and_duplicates() {
        let mut draft = item(9, "draft", "New", None);
        draft.id = None;
        let snap = Snapshot::new(vec![item(1, "a", "New", None), draft, item(1, "again", "New", None)]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(1).unwrap().title, "a");
    }

    #[test]
    fn test_children_only_within_snapshot() {
        let snap = Snapshot::new(vec![
            child(1, "epic", None, None),
            child(2, "feature", Some(1), None),
            child(3, "orphan", Some(99), None),
        ]);
        assert_eq!(snap.children_of(1), &[2]);
        assert!(snap.children_of(99).is_empty());
    }

    #[test]
    fn test_forest_depth_and_sibling_order() {
        let snap = Snapshot::new(vec![
            child(1, "epic", None, Some(10.0)),
            child(2, "second", Some(1), Some(200.0)),
            child(3, "first", Some(1), Some(100.0)),
            child(4, "grandchild", Some(2), None),
            child(5, "other root", None, Some(5.0)),
        ]);
        let forest = snap.forest(|_| true);
        assert_eq!(forest.order(), &[5, 1, 3, 2, 4]);
        assert_eq!(forest.depth(4), Some(2));
        assert_eq!(forest.parent(4), Some(2));
        assert_eq!(forest.parent(1), None);
        assert_eq!(forest.sibling_groups()[0], (None, vec![5, 1]));
        assert_eq!(forest.sibling_groups()[1], (Some(1), vec![3, 2]));
    }

    #[test]
    fn test_forest_hidden_parent_promotes_child() {
        let mut parent = child(1, "removed epic", None, None);
        parent.workflow_state = "Removed".to_string();
        let snap = Snapshot::new(vec![parent, child(2, "feature", Some(1), None)]);
        let forest = snap.forest(|item| item.workflow_state != "Removed");
        assert!(!forest.contains(1));
        assert_eq!(forest.depth(2), Some(0));
        assert_eq!(forest.parent(2), None);
    }

    #[test]
    fn test_forest_breaks_parent_cycle() {
        let snap = Snapshot::new(vec![child(1, "a", Some(2), None), child(2, "b", Some(1), None)]);
        let forest = snap.forest(|_| true);
        assert_eq!(forest.order().len(), 2);
        assert_eq!(forest.depth(1), Some(0));
        assert_eq!(forest.depth(2), Some(1));
    }
}
