use axum::{
    extract::{Query, State},
    response::{sse::Event, Json, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::state::AppState;

const DEFAULT_LOG_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    limit: Option<usize>,
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "running",
        "port": state.config.port,
        "bindAddress": state.config.bind_address,
        "organizationUrl": state.config.organization_url,
        "project": state.config.project,
        "authenticated": state.config.pat().is_some(),
        "sessions": state.sessions.session_count(),
    }))
}

pub async fn list_logs(Query(query): Query<LogQuery>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "entries": crate::log_bridge::recent_entries(query.limit.unwrap_or(DEFAULT_LOG_LIMIT)),
    }))
}

/// SSE endpoint: every log record as it is written.
pub async fn stream_logs() -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = crate::log_bridge::subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let entry = item.ok()?;
        let payload = serde_json::to_string(&entry).ok()?;
        Some(Ok(Event::default().data(payload)))
    });
    Sse::new(stream)
}
