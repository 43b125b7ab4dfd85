use crate::api::api_router;
use crate::state::AppState;
/// HTTP server: binds the local API and serves it on a background task.
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub async fn spawn_server(state: AppState) -> Result<u16, Box<dyn std::error::Error>> {
    let port = state.config.port;
    let bind_addr = state.config.bind_address.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app: Router = api_router().layer(cors).with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind_addr, port)).await?;
    let actual_port = listener.local_addr()?.port();

    log::info!(
        "[ticketbuf.server] Listening on http://{}:{}",
        bind_addr,
        actual_port
    );

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("[ticketbuf.server] HTTP server exited with error: {}", e);
        }
    });

    Ok(actual_port)
}
