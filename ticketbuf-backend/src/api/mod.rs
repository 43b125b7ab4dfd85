use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;

mod events;
mod sessions;

use crate::state::AppState;
use ticketbuf_core::session::SessionError;
use ticketbuf_core::storage::StoreError;

/// Axum REST API routes.
///
///   GET    /status                                -> health check + tracker info
///   GET    /logs?limit=n                          -> recent backend log entries
///   GET    /logs/stream                           -> SSE stream of log entries
///   POST   /sessions                              -> fetch items, open a buffer
///   GET    /sessions/:sessionId                   -> current rendering + progress
///   GET    /sessions/:sessionId/text              -> current rendering as plain text
///   DELETE /sessions/:sessionId                   -> close a buffer
///   POST   /sessions/:sessionId/check             -> detect changes without applying
///   POST   /sessions/:sessionId/apply             -> apply edited text, resync
///   POST   /sessions/:sessionId/column-overrides  -> record column picks at an undo seq
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(events::status))
        .route("/logs", get(events::list_logs))
        .route("/logs/stream", get(events::stream_logs))
        .route("/sessions", post(sessions::open_session))
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::close_session),
        )
        .route("/sessions/{session_id}/text", get(sessions::get_session_text))
        .route("/sessions/{session_id}/check", post(sessions::check_session))
        .route("/sessions/{session_id}/apply", post(sessions::apply_session))
        .route(
            "/sessions/{session_id}/column-overrides",
            post(sessions::set_column_overrides),
        )
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Detection(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::Store(StoreError::Rejected(_)) => StatusCode::BAD_REQUEST,
        SessionError::Store(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Map a session error to a response and log it under `target`.
fn session_error(target: &'static str, error: SessionError) -> ApiError {
    let status = status_for(&error);
    let details = match &error {
        SessionError::Detection(messages) => messages.clone(),
        _ => Vec::new(),
    };
    let message = error.to_string();
    log_api_issue(status, target, &message);
    (
        status,
        Json(ErrorResponse {
            error: message,
            details,
        }),
    )
}

fn log_api_issue(status: StatusCode, target: &'static str, message: impl AsRef<str>) {
    let message = message.as_ref();
    if status.is_server_error() {
        log::error!(target: target, "{}", message);
    } else {
        log::warn!(target: target, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_errors_are_unprocessable() {
        let (status, Json(body)) = session_error(
            "ticketbuf.api.test",
            SessionError::Detection(vec!["line 3: item at depth 1 has no parent above it".to_string()]),
        );
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.details.len(), 1);
    }

    #[test]
    fn test_store_errors_map_to_gateway() {
        let error = SessionError::Store(StoreError::Transport("connection reset".to_string()));
        assert_eq!(status_for(&error), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&SessionError::NotFound("abc".to_string())),
            StatusCode::NOT_FOUND
        );
    }
}
