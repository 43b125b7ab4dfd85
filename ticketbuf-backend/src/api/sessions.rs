use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use super::{session_error, ApiError};
use crate::config::BackendConfig;
use crate::state::AppState;
use ticketbuf_core::session::{ApplyReport, ApplyRequest, CheckReport, OpenRequest, SessionView};
use ticketbuf_core::types::{GroupingMode, ItemId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBody {
    pub ids: Vec<ItemId>,
    pub mode: GroupingMode,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub area_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ColumnOverridesBody {
    pub seq: u64,
    pub overrides: HashMap<ItemId, String>,
}

/// Fill the group list and area path from config where the body leaves them out.
fn open_request(body: OpenBody, config: &BackendConfig) -> OpenRequest {
    let groups = body.groups.unwrap_or_else(|| match body.mode {
        GroupingMode::BoardColumn => config.board_columns.clone(),
        GroupingMode::State | GroupingMode::Tree => config.states.clone(),
    });
    OpenRequest {
        ids: body.ids,
        mode: body.mode,
        groups,
        area_path: body.area_path.or_else(|| config.area_path.clone()),
    }
}

pub async fn open_session(
    State(state): State<AppState>,
    Json(body): Json<OpenBody>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let request = open_request(body, &state.config);
    let view = state
        .sessions
        .open(request)
        .await
        .map_err(|e| session_error("ticketbuf.api.sessions.open", e))?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    state
        .sessions
        .get(&session_id)
        .map(Json)
        .map_err(|e| session_error("ticketbuf.api.sessions.get", e))
}

pub async fn get_session_text(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<String, ApiError> {
    state
        .sessions
        .render(&session_id)
        .map_err(|e| session_error("ticketbuf.api.sessions.text", e))
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .close(&session_id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| session_error("ticketbuf.api.sessions.close", e))
}

pub async fn check_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<CheckBody>,
) -> Result<Json<CheckReport>, ApiError> {
    state
        .sessions
        .check(&session_id, &body.text)
        .map(Json)
        .map_err(|e| session_error("ticketbuf.api.sessions.check", e))
}

pub async fn apply_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<ApplyRequest>,
) -> Result<Json<ApplyReport>, ApiError> {
    let report = state
        .sessions
        .apply(&session_id, body)
        .await
        .map_err(|e| session_error("ticketbuf.api.sessions.apply", e))?;
    if report.outcome.failed > 0 {
        log::warn!(
            "[ticketbuf.api] Apply on {} finished with {} failure(s)",
            session_id,
            report.outcome.failed
        );
    }
    Ok(Json(report))
}

pub async fn set_column_overrides(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<ColumnOverridesBody>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .set_column_override(&session_id, body.seq, body.overrides)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| session_error("ticketbuf.api.sessions.overrides", e))
}
