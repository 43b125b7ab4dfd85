/// REST item store for an Azure DevOps style work item tracker.
///
/// Field writes are JSON Patch documents (`application/json-patch+json`).
/// Parent links live in the item's relation list, so reparenting removes the
/// old hierarchy relation by index and adds the new one.
use base64::Engine;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::BackendConfig;
use ticketbuf_core::merge::merge::FieldPatch;
use ticketbuf_core::storage::{CreateFields, ItemStore, StoreError};
use ticketbuf_core::types::{Item, ItemId};

const PARENT_REL: &str = "System.LinkTypes.Hierarchy-Reverse";
const JSON_PATCH: &str = "application/json-patch+json";
/// Upper bound on ids per batch fetch request.
const FETCH_BATCH: usize = 200;

const FIELD_TITLE: &str = "System.Title";
const FIELD_TYPE: &str = "System.WorkItemType";
const FIELD_STATE: &str = "System.State";
const FIELD_AREA: &str = "System.AreaPath";
const FIELD_ITERATION: &str = "System.IterationPath";
const FIELD_DESCRIPTION: &str = "System.Description";
const FIELD_TAGS: &str = "System.Tags";
const FIELD_RANK: &str = "Microsoft.VSTS.Common.StackRank";

/// Failures of a single HTTP exchange with the tracker.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("work item #{0} does not exist")]
    Missing(ItemId),

    #[error("could not encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ClientError> for StoreError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Transport(e) if e.is_decode() => StoreError::Decode(e.to_string()),
            ClientError::Transport(e) => StoreError::Transport(e.to_string()),
            ClientError::Status { status, body } => StoreError::Http { status, body },
            ClientError::Missing(id) => StoreError::NotFound(id),
            ClientError::Encode(e) => StoreError::Rejected(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkItemDto {
    id: ItemId,
    #[serde(default)]
    rev: Option<u64>,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    relations: Option<Vec<RelationDto>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RelationDto {
    rel: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct WorkItemList {
    /// `null` entries for ids the tracker no longer has (errorPolicy=omit).
    value: Vec<Option<WorkItemDto>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct PatchOp {
    op: &'static str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

impl PatchOp {
    fn add_field(field: &str, value: Value) -> Self {
        Self {
            op: "add",
            path: format!("/fields/{}", field),
            value: Some(value),
        }
    }
}

pub struct RestStore {
    client: Client,
    organization_url: String,
    project: String,
    api_version: String,
    pat: Option<String>,
    board_column_field: String,
    removed_state: String,
}

impl RestStore {
    pub fn new(config: &BackendConfig) -> Self {
        let pat = config.pat();
        if pat.is_none() {
            log::warn!(
                "[ticketbuf.client] ${} is not set, requests go out unauthenticated",
                config.pat_env
            );
        }
        Self {
            client: Client::new(),
            organization_url: config.organization_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            api_version: config.api_version.clone(),
            pat,
            board_column_field: config.board_column_field.clone(),
            removed_state: config.removed_state.clone(),
        }
    }

    fn items_url(&self) -> String {
        format!(
            "{}/{}/_apis/wit/workitems",
            self.organization_url,
            utf8_percent_encode(&self.project, NON_ALPHANUMERIC)
        )
    }

    fn item_url(&self, id: ItemId) -> String {
        format!("{}/{}", self.items_url(), id)
    }

    fn link_url(&self, id: ItemId) -> String {
        format!("{}/_apis/wit/workItems/{}", self.organization_url, id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.pat {
            Some(pat) => {
                let token = base64::engine::general_purpose::STANDARD.encode(format!(":{}", pat));
                request.header("Authorization", format!("Basic {}", token))
            }
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, id: Option<ItemId>) -> Result<Response, ClientError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if let (reqwest::StatusCode::NOT_FOUND, Some(id)) = (status, id) {
            return Err(ClientError::Missing(id));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_item(&self, id: ItemId) -> Result<WorkItemDto, ClientError> {
        let request = self
            .client
            .get(self.item_url(id))
            .query(&[("$expand", "relations"), ("api-version", self.api_version.as_str())]);
        Ok(self.send(request, Some(id)).await?.json().await?)
    }

    async fn patch(&self, id: ItemId, ops: &[PatchOp]) -> Result<Item, ClientError> {
        let request = self
            .client
            .patch(self.item_url(id))
            .query(&[("$expand", "relations"), ("api-version", self.api_version.as_str())])
            .header("Content-Type", JSON_PATCH)
            .body(serde_json::to_vec(ops)?);
        let dto: WorkItemDto = self.send(request, Some(id)).await?.json().await?;
        Ok(to_item(dto, &self.board_column_field))
    }
}

impl ItemStore for RestStore {
    async fn fetch_items(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::with_capacity(ids.len());
        for batch in ids.chunks(FETCH_BATCH) {
            let joined = batch.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
            let request = self.client.get(self.items_url()).query(&[
                ("ids", joined.as_str()),
                ("$expand", "relations"),
                ("errorPolicy", "omit"),
                ("api-version", self.api_version.as_str()),
            ]);
            let list: WorkItemList = self
                .send(request, None)
                .await?
                .json()
                .await
                .map_err(ClientError::from)?;
            let found = list.value.into_iter().flatten();
            items.extend(found.map(|dto| to_item(dto, &self.board_column_field)));
        }
        log::debug!(
            "[ticketbuf.client] Fetched {} of {} requested item(s)",
            items.len(),
            ids.len()
        );
        Ok(items)
    }

    async fn create_item(&self, fields: &CreateFields) -> Result<Item, StoreError> {
        let url = format!(
            "{}/${}",
            self.items_url(),
            utf8_percent_encode(&fields.item_type, NON_ALPHANUMERIC)
        );
        let request = self
            .client
            .post(url)
            .query(&[("api-version", self.api_version.as_str())])
            .header("Content-Type", JSON_PATCH)
            .body(serde_json::to_vec(&create_ops(fields)).map_err(ClientError::from)?);
        let dto: WorkItemDto = self
            .send(request, None)
            .await?
            .json()
            .await
            .map_err(ClientError::from)?;
        let item = to_item(dto, &self.board_column_field);
        log::info!(
            "[ticketbuf.client] Created {} #{}",
            fields.item_type,
            item.id.unwrap_or_default()
        );
        Ok(item)
    }

    async fn update_item(&self, id: ItemId, patch: &FieldPatch) -> Result<Item, StoreError> {
        let ops = field_ops(patch, &self.board_column_field);
        if ops.is_empty() {
            return Err(StoreError::Rejected(format!("empty update for #{}", id)));
        }
        Ok(self.patch(id, &ops).await?)
    }

    async fn set_parent(&self, id: ItemId, parent: Option<ItemId>) -> Result<Item, StoreError> {
        let current = self.get_item(id).await?;
        let ops = reparent_ops(
            current.relations.as_deref().unwrap_or_default(),
            parent.map(|p| self.link_url(p)),
        );
        if ops.is_empty() {
            return Ok(to_item(current, &self.board_column_field));
        }
        Ok(self.patch(id, &ops).await?)
    }

    async fn soft_delete(&self, id: ItemId) -> Result<(), StoreError> {
        let ops = [PatchOp::add_field(FIELD_STATE, Value::String(self.removed_state.clone()))];
        self.patch(id, &ops).await?;
        log::info!("[ticketbuf.client] #{} moved to {}", id, self.removed_state);
        Ok(())
    }
}

fn text_field(fields: &Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn to_item(dto: WorkItemDto, board_column_field: &str) -> Item {
    let tags = text_field(&dto.fields, FIELD_TAGS)
        .split(';')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();
    Item {
        id: Some(dto.id),
        revision: dto.rev,
        title: text_field(&dto.fields, FIELD_TITLE),
        item_type: text_field(&dto.fields, FIELD_TYPE),
        workflow_state: text_field(&dto.fields, FIELD_STATE),
        board_column: text_field(&dto.fields, board_column_field),
        parent_id: dto.relations.as_deref().and_then(parent_of),
        priority_rank: dto.fields.get(FIELD_RANK).and_then(Value::as_f64),
        tags,
        description: text_field(&dto.fields, FIELD_DESCRIPTION),
        area: text_field(&dto.fields, FIELD_AREA),
        iteration: text_field(&dto.fields, FIELD_ITERATION),
    }
}

/// Parent id from the hierarchy relation's target URL (`.../workItems/<id>`).
fn parent_of(relations: &[RelationDto]) -> Option<ItemId> {
    relations
        .iter()
        .find(|relation| relation.rel == PARENT_REL)
        .and_then(|relation| relation.url.rsplit('/').next())
        .and_then(|id| id.parse().ok())
}

fn create_ops(fields: &CreateFields) -> Vec<PatchOp> {
    let mut ops = vec![PatchOp::add_field(FIELD_TITLE, Value::String(fields.title.clone()))];
    if let Some(area) = &fields.area {
        ops.push(PatchOp::add_field(FIELD_AREA, Value::String(area.clone())));
    }
    if let Some(iteration) = &fields.iteration {
        ops.push(PatchOp::add_field(FIELD_ITERATION, Value::String(iteration.clone())));
    }
    if let Some(state) = &fields.state {
        ops.push(PatchOp::add_field(FIELD_STATE, Value::String(state.clone())));
    }
    ops
}

fn field_ops(patch: &FieldPatch, board_column_field: &str) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    if let Some(title) = &patch.title {
        ops.push(PatchOp::add_field(FIELD_TITLE, Value::String(title.clone())));
    }
    if let Some(state) = &patch.state {
        ops.push(PatchOp::add_field(FIELD_STATE, Value::String(state.clone())));
    }
    if let Some(column) = &patch.board_column {
        ops.push(PatchOp::add_field(board_column_field, Value::String(column.clone())));
    }
    if let Some(rank) = patch.priority_rank {
        ops.push(PatchOp::add_field(FIELD_RANK, serde_json::json!(rank)));
    }
    if let Some(description) = &patch.description {
        ops.push(PatchOp::add_field(FIELD_DESCRIPTION, Value::String(description.clone())));
    }
    if let Some(tags) = &patch.tags {
        ops.push(PatchOp::add_field(FIELD_TAGS, Value::String(tags.join("; "))));
    }
    ops
}

/// Remove the current hierarchy relation (if any) and link the new parent.
fn reparent_ops(relations: &[RelationDto], parent_url: Option<String>) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    if let Some(index) = relations.iter().position(|relation| relation.rel == PARENT_REL) {
        if parent_url.as_deref() == Some(relations[index].url.as_str()) {
            return ops;
        }
        ops.push(PatchOp {
            op: "remove",
            path: format!("/relations/{}", index),
            value: None,
        });
    }
    if let Some(url) = parent_url {
        ops.push(PatchOp {
            op: "add",
            path: "/relations/-".to_string(),
            value: Some(serde_json::json!({ "rel": PARENT_REL, "url": url })),
        });
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(rel: &str, url: &str) -> RelationDto {
        RelationDto {
            rel: rel.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_to_item_reads_fields_and_parent() {
        let dto: WorkItemDto = serde_json::from_value(serde_json::json!({
            "id": 42,
            "rev": 7,
            "fields": {
                "System.Title": "Crash on save",
                "System.WorkItemType": "Bug",
                "System.State": "Active",
                "Custom.Column": "Doing",
                "Microsoft.VSTS.Common.StackRank": 1500.5,
                "System.Tags": "ui; regression ;",
            },
            "relations": [
                { "rel": "System.LinkTypes.Related", "url": "https://dev.azure.com/o/_apis/wit/workItems/3" },
                { "rel": "System.LinkTypes.Hierarchy-Reverse", "url": "https://dev.azure.com/o/_apis/wit/workItems/10" },
            ]
        }))
        .unwrap();
        let item = to_item(dto, "Custom.Column");
        assert_eq!(item.id, Some(42));
        assert_eq!(item.revision, Some(7));
        assert_eq!(item.item_type, "Bug");
        assert_eq!(item.board_column, "Doing");
        assert_eq!(item.parent_id, Some(10));
        assert_eq!(item.priority_rank, Some(1500.5));
        assert_eq!(item.tags, vec!["ui", "regression"]);
    }

    #[test]
    fn test_item_without_relations_has_no_parent() {
        let dto: WorkItemDto =
            serde_json::from_value(serde_json::json!({ "id": 1, "fields": { "System.Title": "x" } })).unwrap();
        let item = to_item(dto, "System.BoardColumn");
        assert_eq!(item.parent_id, None);
        assert_eq!(item.board_column, "");
        assert_eq!(item.priority_rank, None);
    }

    #[test]
    fn test_field_ops_only_for_set_fields() {
        let patch = FieldPatch {
            title: Some("New title".to_string()),
            priority_rank: Some(250.0),
            tags: Some(vec!["a".to_string(), "b".to_string()]),
            ..FieldPatch::default()
        };
        let ops = field_ops(&patch, "System.BoardColumn");
        let paths: Vec<&str> = ops.iter().map(|op| op.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/fields/System.Title",
                "/fields/Microsoft.VSTS.Common.StackRank",
                "/fields/System.Tags"
            ]
        );
        assert_eq!(ops[2].value, Some(Value::String("a; b".to_string())));
    }

    #[test]
    fn test_reparent_removes_old_link_by_index() {
        let relations = vec![
            relation("System.LinkTypes.Related", "u/3"),
            relation(PARENT_REL, "u/10"),
        ];
        let ops = reparent_ops(&relations, Some("u/20".to_string()));
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op, "remove");
        assert_eq!(ops[0].path, "/relations/1");
        assert_eq!(ops[1].path, "/relations/-");
    }

    #[test]
    fn test_reparent_to_same_parent_is_noop() {
        let relations = vec![relation(PARENT_REL, "u/10")];
        assert!(reparent_ops(&relations, Some("u/10".to_string())).is_empty());
    }

    #[test]
    fn test_detach_only_removes() {
        let relations = vec![relation(PARENT_REL, "u/10")];
        let ops = reparent_ops(&relations, None);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, "remove");
    }

    #[test]
    fn test_create_ops_skip_missing_fields() {
        let ops = create_ops(&CreateFields {
            item_type: "Task".to_string(),
            title: "Write docs".to_string(),
            area: Some("Web\\Team".to_string()),
            ..CreateFields::default()
        });
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].path, "/fields/System.AreaPath");
    }

    #[test]
    fn test_patch_body_serialization() {
        let body = serde_json::to_value(reparent_ops(&[], Some("u/5".to_string()))).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{
                "op": "add",
                "path": "/relations/-",
                "value": { "rel": PARENT_REL, "url": "u/5" }
            }])
        );
    }
}
