/// Executes detected changes against an item store.
///
/// Creates run first, one at a time, shallowest first, so a nested draft
/// can hang under the id its parent draft was just assigned. Everything
/// else (deletes, field patches, reparents) is issued concurrently after
/// the last create completes.
use std::collections::BTreeMap;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::watch;

use crate::merge::diff::{Change, ParentRef};
use crate::merge::merge::FieldPatch;
use crate::storage::{CreateFields, ItemStore, StoreError};
use crate::types::{GroupingMode, ItemId};

/// Running tally of one apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub issued: usize,
    pub completed: usize,
}

/// Aggregate result of one apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub succeeded: usize,
    pub failed: usize,
    pub messages: Vec<String>,
    /// Buffer line of each created draft -> id assigned by the tracker.
    pub created: BTreeMap<usize, ItemId>,
}

impl Outcome {
    fn success(&mut self) {
        self.succeeded += 1;
    }

    fn failure(&mut self, message: String) {
        log::warn!("[ticketbuf.apply] {}", message);
        self.failed += 1;
        self.messages.push(message);
    }
}

enum Op<'a> {
    Delete(ItemId),
    Update(ItemId, &'a FieldPatch),
    Reparent(ItemId, Option<ItemId>),
}

pub struct Reconciler<'a, S: ItemStore> {
    store: &'a S,
    mode: GroupingMode,
    progress: Option<watch::Sender<Progress>>,
}

impl<'a, S: ItemStore> Reconciler<'a, S> {
    pub fn new(store: &'a S, mode: GroupingMode) -> Self {
        Self {
            store,
            mode,
            progress: None,
        }
    }

    /// Publish `{issued, completed}` after every finished operation.
    pub fn with_progress(mut self, sender: watch::Sender<Progress>) -> Self {
        self.progress = Some(sender);
        self
    }

    fn report(&self, tally: &mut Progress) {
        tally.completed += 1;
        if let Some(sender) = &self.progress {
            sender.send_replace(*tally);
        }
    }

    /// Run one apply batch. Never aborts early: every operation is issued
    /// and its failure recorded in the outcome.
    pub async fn apply(
        &self,
        changes: &[Change],
        merged: &BTreeMap<ItemId, FieldPatch>,
        area_path: Option<&str>,
    ) -> Outcome {
        let mut creates: Vec<&Change> = changes
            .iter()
            .filter(|change| matches!(change, Change::Created { .. }))
            .collect();
        creates.sort_by_key(|change| match change {
            Change::Created { depth, line, .. } => (*depth, *line),
            _ => (0, 0),
        });

        let deletes: Vec<ItemId> = changes
            .iter()
            .filter_map(|change| match change {
                Change::Deleted { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        let reparents: Vec<(ItemId, ParentRef)> = changes
            .iter()
            .filter_map(|change| match change {
                Change::ParentChanged { id, new_parent, .. } => Some((*id, *new_parent)),
                _ => None,
            })
            .collect();

        let mut tally = Progress {
            issued: creates.len() + deletes.len() + merged.len() + reparents.len(),
            completed: 0,
        };
        if let Some(sender) = &self.progress {
            sender.send_replace(tally);
        }
        log::info!(
            "[ticketbuf.apply] Applying {} create(s), {} delete(s), {} update(s), {} reparent(s)",
            creates.len(),
            deletes.len(),
            merged.len(),
            reparents.len()
        );

        let mut outcome = Outcome::default();

        for change in creates {
            if let Change::Created {
                line,
                title,
                item_type,
                group,
                parent,
                ..
            } = change
            {
                match self
                    .create_one(*line, title, item_type, group.as_deref(), *parent, area_path, &mut outcome)
                    .await
                {
                    Ok(()) => outcome.success(),
                    Err(message) => outcome.failure(message),
                }
                self.report(&mut tally);
            }
        }

        let mut ops: Vec<Op> = Vec::new();
        ops.extend(deletes.into_iter().map(Op::Delete));
        ops.extend(merged.iter().map(|(id, patch)| Op::Update(*id, patch)));
        for (id, parent) in reparents {
            match resolve_parent(parent, &outcome.created) {
                Ok(parent) => ops.push(Op::Reparent(id, parent)),
                Err(line) => {
                    outcome.failure(format!(
                        "#{}: new parent on line {} was not created, reparent skipped",
                        id, line
                    ));
                    self.report(&mut tally);
                }
            }
        }

        let mut pending: FuturesUnordered<_> = ops.into_iter().map(|op| self.run(op)).collect();
        while let Some(result) = pending.next().await {
            match result {
                Ok(()) => outcome.success(),
                Err(message) => outcome.failure(message),
            }
            self.report(&mut tally);
        }

        log::info!(
            "[ticketbuf.apply] Done: {} succeeded, {} failed",
            outcome.succeeded,
            outcome.failed
        );
        outcome
    }

    /// Create one draft plus its follow-up placement request.
    #[allow(clippy::too_many_arguments)]
    async fn create_one(
        &self,
        line: usize,
        title: &str,
        item_type: &str,
        group: Option<&str>,
        parent: ParentRef,
        area_path: Option<&str>,
        outcome: &mut Outcome,
    ) -> Result<(), String> {
        let fields = CreateFields {
            item_type: item_type.to_string(),
            title: title.to_string(),
            area: area_path.map(str::to_string),
            iteration: None,
            state: match self.mode {
                GroupingMode::State => group.map(str::to_string),
                _ => None,
            },
        };

        let item = self
            .store
            .create_item(&fields)
            .await
            .map_err(|e| format!("line {}: could not create \"{}\": {}", line, title, e))?;
        let id = item
            .id
            .ok_or_else(|| format!("line {}: tracker returned \"{}\" without an id", line, title))?;
        outcome.created.insert(line, id);
        log::debug!("[ticketbuf.apply] Line {} created as #{}", line, id);

        match self.mode {
            GroupingMode::Tree => {
                let parent = resolve_parent(parent, &outcome.created).map_err(|parent_line| {
                    format!(
                        "#{} (line {}): parent on line {} was not created, left at top level",
                        id, line, parent_line
                    )
                })?;
                if let Some(parent) = parent {
                    self.store
                        .set_parent(id, Some(parent))
                        .await
                        .map_err(|e| format!("#{} (line {}): could not attach to #{}: {}", id, line, parent, e))?;
                }
            }
            GroupingMode::BoardColumn => {
                if let Some(column) = group {
                    let patch = FieldPatch {
                        board_column: Some(column.to_string()),
                        ..FieldPatch::default()
                    };
                    self.store
                        .update_item(id, &patch)
                        .await
                        .map_err(|e| format!("#{} (line {}): could not move to {}: {}", id, line, column, e))?;
                }
            }
            GroupingMode::State => {}
        }
        Ok(())
    }

    async fn run(&self, op: Op<'_>) -> Result<(), String> {
        match op {
            Op::Delete(id) => self.store.soft_delete(id).await.map_err(|e| describe("delete", id, e)),
            Op::Update(id, patch) => self
                .store
                .update_item(id, patch)
                .await
                .map(|_| ())
                .map_err(|e| describe("update", id, e)),
            Op::Reparent(id, parent) => self
                .store
                .set_parent(id, parent)
                .await
                .map(|_| ())
                .map_err(|e| describe("reparent", id, e)),
        }
    }
}

fn describe(action: &str, id: ItemId, error: StoreError) -> String {
    format!("#{}: {} failed: {}", id, action, error)
}

/// Concrete parent id for a reference; `Err(line)` when it points at a
/// draft that never got an id.
fn resolve_parent(parent: ParentRef, created: &BTreeMap<usize, ItemId>) -> Result<Option<ItemId>, usize> {
    match parent {
        ParentRef::Root => Ok(None),
        ParentRef::Existing(id) => Ok(Some(id)),
        ParentRef::Pending(line) => created.get(&line).copied().map(Some).ok_or(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{Call, MemoryStore};
    use crate::types::tests::{child, item};

    fn created(line: usize, title: &str, depth: usize, parent: ParentRef, group: Option<&str>) -> Change {
        Change::Created {
            line,
            title: title.to_string(),
            item_type: "Task".to_string(),
            group: group.map(str::to_string),
            depth,
            parent,
        }
    }

    #[tokio::test]
    async fn test_creates_run_shallow_first_and_resolve_pending_parents() {
        let store = MemoryStore::new(vec![child(10, "Epic", None, None)]);
        let changes = vec![
            created(4, "grandchild", 2, ParentRef::Pending(3), None),
            created(3, "child", 1, ParentRef::Existing(10), None),
        ];
        let outcome = Reconciler::new(&store, GroupingMode::Tree)
            .apply(&changes, &BTreeMap::new(), Some("Team\\Web"))
            .await;

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 0);
        let child_id = outcome.created[&3];
        let grandchild_id = outcome.created[&4];
        assert_eq!(
            store.calls(),
            vec![
                Call::Create("child".to_string()),
                Call::SetParent(child_id, Some(10)),
                Call::Create("grandchild".to_string()),
                Call::SetParent(grandchild_id, Some(child_id)),
            ]
        );
        assert_eq!(store.get(grandchild_id).unwrap().area, "Team\\Web");
    }

    #[tokio::test]
    async fn test_failed_parent_create_fails_dependent_child() {
        let store = MemoryStore::new(vec![child(10, "Epic", None, None)]);
        store.fail_create("child");
        let changes = vec![
            created(3, "child", 1, ParentRef::Existing(10), None),
            created(4, "grandchild", 2, ParentRef::Pending(3), None),
        ];
        let outcome = Reconciler::new(&store, GroupingMode::Tree)
            .apply(&changes, &BTreeMap::new(), None)
            .await;

        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.failed, 2);
        // The grandchild itself exists, only its placement failed.
        assert!(outcome.created.contains_key(&4));
        assert!(!store.calls().iter().any(|call| matches!(call, Call::SetParent(..))));
    }

    #[tokio::test]
    async fn test_state_mode_creates_in_target_state() {
        let store = MemoryStore::new(vec![]);
        let changes = vec![created(2, "draft", 0, ParentRef::Root, Some("Active"))];
        let outcome = Reconciler::new(&store, GroupingMode::State)
            .apply(&changes, &BTreeMap::new(), None)
            .await;
        let id = outcome.created[&2];
        assert_eq!(store.get(id).unwrap().workflow_state, "Active");
        assert_eq!(store.calls(), vec![Call::Create("draft".to_string())]);
    }

    #[tokio::test]
    async fn test_board_mode_places_created_item_in_column() {
        let store = MemoryStore::new(vec![]);
        let changes = vec![created(2, "draft", 0, ParentRef::Root, Some("Doing"))];
        let outcome = Reconciler::new(&store, GroupingMode::BoardColumn)
            .apply(&changes, &BTreeMap::new(), None)
            .await;
        let id = outcome.created[&2];
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(store.get(id).unwrap().board_column, "Doing");
        assert_eq!(store.calls(), vec![Call::Create("draft".to_string()), Call::Update(id)]);
    }

    #[tokio::test]
    async fn test_creates_precede_other_operations() {
        let store = MemoryStore::new(vec![item(1, "old", "New", None), item(2, "gone", "New", None)]);
        let changes = vec![
            Change::Deleted {
                id: 2,
                title: "gone".to_string(),
            },
            created(5, "draft", 0, ParentRef::Root, Some("New")),
        ];
        let mut merged = BTreeMap::new();
        merged.insert(
            1,
            FieldPatch {
                title: Some("renamed".to_string()),
                ..FieldPatch::default()
            },
        );
        let outcome = Reconciler::new(&store, GroupingMode::State)
            .apply(&changes, &merged, None)
            .await;

        assert_eq!(outcome.succeeded, 3);
        let calls = store.calls();
        assert_eq!(calls[0], Call::Create("draft".to_string()));
        assert!(calls[1..].contains(&Call::SoftDelete(2)));
        assert!(calls[1..].contains(&Call::Update(1)));
        assert_eq!(store.get(2).unwrap().workflow_state, "Removed");
        assert_eq!(store.get(1).unwrap().title, "renamed");
    }

    #[tokio::test]
    async fn test_partial_failure_is_tallied() {
        let store = MemoryStore::new(vec![item(1, "a", "New", None), item(2, "b", "New", None)]);
        store.fail_on(2);
        let mut merged = BTreeMap::new();
        for id in [1, 2] {
            merged.insert(
                id,
                FieldPatch {
                    state: Some("Active".to_string()),
                    ..FieldPatch::default()
                },
            );
        }
        let (tx, rx) = watch::channel(Progress::default());
        let outcome = Reconciler::new(&store, GroupingMode::State)
            .with_progress(tx)
            .apply(&[], &merged, None)
            .await;

        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.messages[0].contains("#2"));
        assert_eq!(*rx.borrow(), Progress { issued: 2, completed: 2 });
    }

    #[tokio::test]
    async fn test_reparent_to_pending_draft() {
        let store = MemoryStore::new(vec![child(1, "Epic", None, None), child(2, "Story", None, None)]);
        let changes = vec![
            created(3, "new feature", 1, ParentRef::Existing(1), None),
            Change::ParentChanged {
                id: 2,
                old_parent: None,
                new_parent: ParentRef::Pending(3),
            },
        ];
        let outcome = Reconciler::new(&store, GroupingMode::Tree)
            .apply(&changes, &BTreeMap::new(), None)
            .await;
        let feature = outcome.created[&3];
        assert_eq!(outcome.failed, 0);
        assert_eq!(store.get(2).unwrap().parent_id, Some(feature));
    }

    #[tokio::test]
    async fn test_unresolved_reparent_is_not_sent() {
        let store = MemoryStore::new(vec![child(1, "Epic", None, None), child(2, "Story", None, None)]);
        store.fail_create("new feature");
        let changes = vec![
            created(3, "new feature", 1, ParentRef::Existing(1), None),
            Change::ParentChanged {
                id: 2,
                old_parent: None,
                new_parent: ParentRef::Pending(3),
            },
        ];
        let outcome = Reconciler::new(&store, GroupingMode::Tree)
            .apply(&changes, &BTreeMap::new(), None)
            .await;
        assert_eq!(outcome.failed, 2);
        assert!(!store.calls().contains(&Call::SetParent(2, None)));
        assert_eq!(store.get(2).unwrap().parent_id, None);
    }
}
