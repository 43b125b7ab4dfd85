/// In-memory tracker used by the apply and session tests.
///
/// Records every call in order so tests can assert on sequencing, and can
/// be told to fail specific operations.
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use super::{CreateFields, ItemStore, StoreError};
use crate::merge::merge::FieldPatch;
use crate::types::{Item, ItemId};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch(Vec<ItemId>),
    Create(String),
    Update(ItemId),
    SetParent(ItemId, Option<ItemId>),
    SoftDelete(ItemId),
}

pub struct MemoryStore {
    items: RwLock<HashMap<ItemId, Item>>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<ItemId>>,
    failing_titles: Mutex<HashSet<String>>,
    next_id: Mutex<ItemId>,
    removed_state: String,
}

impl MemoryStore {
    pub fn new(items: Vec<Item>) -> Self {
        let next_id = items.iter().filter_map(|item| item.id).max().unwrap_or(0) + 100;
        Self {
            items: RwLock::new(items.into_iter().filter_map(|item| Some((item.id?, item))).collect()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            failing_titles: Mutex::new(HashSet::new()),
            next_id: Mutex::new(next_id),
            removed_state: "Removed".to_string(),
        }
    }

    /// Every mutation of `id` fails from now on.
    pub fn fail_on(&self, id: ItemId) {
        self.failing.lock().unwrap().insert(id);
    }

    /// Creating an item with this title fails.
    pub fn fail_create(&self, title: &str) {
        self.failing_titles.lock().unwrap().insert(title.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get(&self, id: ItemId) -> Option<Item> {
        self.items.read().unwrap().get(&id).cloned()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, id: ItemId) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(&id) {
            return Err(StoreError::Http {
                status: 400,
                body: format!("rejected #{}", id),
            });
        }
        Ok(())
    }

    fn modify(&self, id: ItemId, f: impl FnOnce(&mut Item)) -> Result<Item, StoreError> {
        self.check(id)?;
        let mut items = self.items.write().unwrap();
        let item = items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        f(item);
        item.revision = Some(item.revision.unwrap_or(0) + 1);
        Ok(item.clone())
    }
}

impl ItemStore for MemoryStore {
    async fn fetch_items(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoreError> {
        self.record(Call::Fetch(ids.to_vec()));
        let items = self.items.read().unwrap();
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn create_item(&self, fields: &CreateFields) -> Result<Item, StoreError> {
        self.record(Call::Create(fields.title.clone()));
        if self.failing_titles.lock().unwrap().contains(&fields.title) {
            return Err(StoreError::Rejected(format!("cannot create {}", fields.title)));
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        let item = Item {
            id: Some(id),
            revision: Some(1),
            title: fields.title.clone(),
            item_type: fields.item_type.clone(),
            workflow_state: fields.state.clone().unwrap_or_else(|| "New".to_string()),
            area: fields.area.clone().unwrap_or_default(),
            iteration: fields.iteration.clone().unwrap_or_default(),
            ..Item::default()
        };
        self.items.write().unwrap().insert(id, item.clone());
        Ok(item)
    }

    async fn update_item(&self, id: ItemId, patch: &FieldPatch) -> Result<Item, StoreError> {
        self.record(Call::Update(id));
        self.modify(id, |item| {
            if let Some(title) = &patch.title {
                item.title = title.clone();
            }
            if let Some(state) = &patch.state {
                item.workflow_state = state.clone();
            }
            if let Some(column) = &patch.board_column {
                item.board_column = column.clone();
            }
            if let Some(rank) = patch.priority_rank {
                item.priority_rank = Some(rank);
            }
            if let Some(description) = &patch.description {
                item.description = description.clone();
            }
            if let Some(tags) = &patch.tags {
                item.tags = tags.clone();
            }
        })
    }

    async fn set_parent(&self, id: ItemId, parent: Option<ItemId>) -> Result<Item, StoreError> {
        self.record(Call::SetParent(id, parent));
        self.modify(id, |item| item.parent_id = parent)
    }

    async fn soft_delete(&self, id: ItemId) -> Result<(), StoreError> {
        self.record(Call::SoftDelete(id));
        let removed = self.removed_state.clone();
        self.modify(id, |item| item.workflow_state = removed).map(|_| ())
    }
}
