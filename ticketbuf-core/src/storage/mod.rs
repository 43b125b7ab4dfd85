#[cfg(test)]
pub mod memory;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::merge::merge::FieldPatch;
use crate::types::{Item, ItemId};

/// Remote work item tracker the reconciliation core reads from and writes to.
/// Implementations: REST client in the backend, in-memory store for tests.
pub trait ItemStore: Send + Sync {
    /// Fetch the given ids. Ids the tracker no longer knows are omitted.
    fn fetch_items(&self, ids: &[ItemId]) -> impl Future<Output = Result<Vec<Item>, StoreError>> + Send;

    /// Create a new item and return it with its assigned id.
    fn create_item(&self, fields: &CreateFields) -> impl Future<Output = Result<Item, StoreError>> + Send;

    /// Write the set fields of `patch` onto an existing item.
    fn update_item(
        &self,
        id: ItemId,
        patch: &FieldPatch,
    ) -> impl Future<Output = Result<Item, StoreError>> + Send;

    /// Replace the item's hierarchy parent; `None` detaches it.
    fn set_parent(
        &self,
        id: ItemId,
        parent: Option<ItemId>,
    ) -> impl Future<Output = Result<Item, StoreError>> + Send;

    /// Move the item out of view without destroying it.
    fn soft_delete(&self, id: ItemId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Fields sent when creating an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFields {
    pub item_type: String,
    pub title: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub iteration: Option<String>,
    /// Initial workflow state; the tracker default when `None`.
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Item not found: #{0}")]
    NotFound(ItemId),

    #[error("Tracker returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Could not decode tracker response: {0}")]
    Decode(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}
