/// Open editor buffers and their snapshots.
///
/// Each session owns exactly one snapshot. Locks are never held across a
/// store call: the snapshot `Arc` is cloned out, the async work runs, and
/// the refreshed snapshot is swapped in afterwards.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use uuid::Uuid;

use crate::apply::{Outcome, Progress, Reconciler};
use crate::config::BufferConfig;
use crate::merge::diff::{compute_changes, Change};
use crate::merge::merge::{merge_changes, AuxEdit};
use crate::overrides::ColumnOverrideLog;
use crate::parser::{generate_lines, parse_buffer};
use crate::storage::{ItemStore, StoreError};
use crate::types::{GroupingMode, ItemId, Snapshot};

pub type SessionId = String;

/// SHA-256 of buffer text with line endings normalized.
pub fn content_fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.replace("\r\n", "\n").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Buffer has {} structural error(s)", .0.len())]
    Detection(Vec<String>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    pub ids: Vec<ItemId>,
    pub mode: GroupingMode,
    /// Display order of groups; derived from the fetched items when empty.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub area_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub text: String,
    #[serde(default)]
    pub aux: BTreeMap<ItemId, AuxEdit>,
    /// Editor undo sequence the column overrides are read at; latest when absent.
    #[serde(default)]
    pub undo_seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session: SessionId,
    pub mode: GroupingMode,
    pub groups: Vec<String>,
    pub lines: Vec<String>,
    pub fingerprint: String,
    pub item_count: usize,
    pub fetched_at: DateTime<Local>,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub changes: Vec<Change>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub outcome: Outcome,
    pub lines: Vec<String>,
    pub fingerprint: String,
}

struct Session {
    ids: Vec<ItemId>,
    mode: GroupingMode,
    groups: Vec<String>,
    area_path: Option<String>,
    snapshot: Arc<Snapshot>,
    fingerprint: String,
    overrides: ColumnOverrideLog,
    progress: watch::Receiver<Progress>,
}

impl Session {
    fn render(&self, config: &BufferConfig) -> Vec<String> {
        generate_lines(&self.snapshot, self.mode, &self.groups, config)
    }
}

/// Distinct group keys of a snapshot in first-seen order.
fn derive_groups(snapshot: &Snapshot, mode: GroupingMode) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();
    for item in snapshot.items() {
        let key = item.group_key(mode);
        if !groups.iter().any(|g| g == key) {
            groups.push(key.to_string());
        }
    }
    groups
}

pub struct SessionRegistry<S: ItemStore> {
    store: Arc<S>,
    config: BufferConfig,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl<S: ItemStore> SessionRegistry<S> {
    pub fn new(store: Arc<S>, config: BufferConfig) -> Self {
        Self {
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    /// Fetch the items and open a buffer over them.
    pub async fn open(&self, request: OpenRequest) -> Result<SessionView, SessionError> {
        let items = self.store.fetch_items(&request.ids).await?;
        let snapshot = Snapshot::new(items);
        let groups = if request.groups.is_empty() {
            derive_groups(&snapshot, request.mode)
        } else {
            request.groups
        };

        let (_, progress) = watch::channel(Progress::default());
        let mut session = Session {
            ids: request.ids,
            mode: request.mode,
            groups,
            area_path: request.area_path,
            snapshot: Arc::new(snapshot),
            fingerprint: String::new(),
            overrides: ColumnOverrideLog::new(),
            progress,
        };
        let lines = session.render(&self.config);
        session.fingerprint = content_fingerprint(&lines.join("\n"));

        let id = Uuid::new_v4().to_string();
        log::info!(
            "[ticketbuf.session] Opened {} ({:?}, {} item(s))",
            id,
            session.mode,
            session.snapshot.len()
        );
        let view = self.view_of(&id, &session, lines);
        self.write().insert(id, session);
        Ok(view)
    }

    fn view_of(&self, id: &str, session: &Session, lines: Vec<String>) -> SessionView {
        SessionView {
            session: id.to_string(),
            mode: session.mode,
            groups: session.groups.clone(),
            lines,
            fingerprint: session.fingerprint.clone(),
            item_count: session.snapshot.len(),
            fetched_at: session.snapshot.fetched_at(),
            progress: *session.progress.borrow(),
        }
    }

    /// Current rendering of a session.
    pub fn get(&self, id: &str) -> Result<SessionView, SessionError> {
        let sessions = self.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(self.view_of(id, session, session.render(&self.config)))
    }

    pub fn render(&self, id: &str) -> Result<String, SessionError> {
        Ok(self.get(id)?.lines.join("\n"))
    }

    /// Whether `text` differs from what the session last rendered.
    pub fn is_modified(&self, id: &str, text: &str) -> Result<bool, SessionError> {
        let sessions = self.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(content_fingerprint(text) != session.fingerprint)
    }

    /// Detect changes without touching the tracker.
    pub fn check(&self, id: &str, text: &str) -> Result<CheckReport, SessionError> {
        let sessions = self.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let lines = parse_buffer(text, &self.config);
        let available = self.config.visible_groups(&session.groups);
        let detection = compute_changes(&session.snapshot, &lines, session.mode, &available, &self.config);
        Ok(CheckReport {
            errors: detection.error_messages(),
            changes: detection.changes,
        })
    }

    /// Record the column override set the editor holds at undo sequence `seq`.
    pub fn set_column_override(
        &self,
        id: &str,
        seq: u64,
        overrides: HashMap<ItemId, String>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        log::debug!(
            "[ticketbuf.session] {} column override(s) recorded for {} at seq {}",
            overrides.len(),
            id,
            seq
        );
        session.overrides.record(seq, overrides);
        Ok(())
    }

    /// Detect, merge and apply an edited buffer, then resync the session
    /// from the tracker. Structural errors abort before any mutation.
    pub async fn apply(&self, id: &str, request: ApplyRequest) -> Result<ApplyReport, SessionError> {
        let (snapshot, mode, groups, area_path, overrides, unchanged) = {
            let sessions = self.read();
            let session = sessions
                .get(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            let overrides = match request.undo_seq {
                Some(seq) => session.overrides.at(seq),
                None => session.overrides.latest(),
            };
            (
                Arc::clone(&session.snapshot),
                session.mode,
                session.groups.clone(),
                session.area_path.clone(),
                overrides.cloned().unwrap_or_default(),
                content_fingerprint(&request.text) == session.fingerprint,
            )
        };

        let lines = parse_buffer(&request.text, &self.config);
        let available = self.config.visible_groups(&groups);
        let detection = compute_changes(&snapshot, &lines, mode, &available, &self.config);
        if detection.is_blocked() {
            log::warn!(
                "[ticketbuf.session] Apply on {} blocked by {} structural error(s)",
                id,
                detection.errors.len()
            );
            return Err(SessionError::Detection(detection.error_messages()));
        }

        let mut aux = request.aux;
        let foreign: Vec<ItemId> = aux.keys().copied().filter(|item_id| !snapshot.contains(*item_id)).collect();
        if !foreign.is_empty() {
            log::warn!(
                "[ticketbuf.session] Apply on {} ignores side edits for item(s) outside the session: {:?}",
                id,
                foreign
            );
            aux.retain(|item_id, _| snapshot.contains(*item_id));
        }
        for (item_id, column) in overrides {
            let Some(item) = snapshot.get(item_id) else { continue };
            if self.config.same_group(&item.board_column, &column) {
                continue;
            }
            let edit = aux.entry(item_id).or_default();
            if edit.board_column.is_none() {
                edit.board_column = Some(column);
            }
        }

        if unchanged && aux.is_empty() {
            log::debug!("[ticketbuf.session] Apply on {} with unchanged buffer, nothing to do", id);
            let view = self.get(id)?;
            return Ok(ApplyReport {
                outcome: Outcome::default(),
                lines: view.lines,
                fingerprint: view.fingerprint,
            });
        }

        let merged = merge_changes(&detection.changes, &aux);
        let (progress_tx, progress_rx) = watch::channel(Progress::default());
        {
            let mut sessions = self.write();
            if let Some(session) = sessions.get_mut(id) {
                session.progress = progress_rx;
            }
        }
        let mut outcome = Reconciler::new(self.store.as_ref(), mode)
            .with_progress(progress_tx)
            .apply(&detection.changes, &merged, area_path.as_deref())
            .await;

        // Resync regardless of failures so the buffer shows tracker truth.
        let mut ids = snapshot.ids();
        for created in outcome.created.values() {
            if !ids.contains(created) {
                ids.push(*created);
            }
        }
        let refreshed = match self.store.fetch_items(&ids).await {
            Ok(items) => Some(Arc::new(Snapshot::new(items))),
            Err(e) => {
                log::error!("[ticketbuf.session] Refresh after apply on {} failed: {}", id, e);
                outcome.messages.push(format!("refresh failed: {}", e));
                None
            }
        };

        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        for created in outcome.created.values() {
            if !session.ids.contains(created) {
                session.ids.push(*created);
            }
        }
        if let Some(refreshed) = refreshed {
            session.snapshot = refreshed;
        }
        let lines = session.render(&self.config);
        session.fingerprint = content_fingerprint(&lines.join("\n"));

        Ok(ApplyReport {
            outcome,
            lines,
            fingerprint: session.fingerprint.clone(),
        })
    }

    pub fn close(&self, id: &str) -> Result<(), SessionError> {
        self.write()
            .remove(id)
            .map(|_| log::info!("[ticketbuf.session] Closed {}", id))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }
}
