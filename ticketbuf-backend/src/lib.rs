/// ticketbuf backend: config loading, logger, tracker client, local HTTP API.
pub mod api;
pub mod client;
pub mod config;
mod log_bridge;
mod server;
pub mod state;

use crate::state::AppState;
use std::path::PathBuf;

/// Run until Ctrl-C. An explicit config path overrides the default location.
pub async fn run(config_path: Option<PathBuf>) {
    if let Err(e) = log_bridge::init() {
        eprintln!("failed to initialize backend logger: {}", e);
    }

    let config_path = config_path.unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path);
    if config.organization_url.is_empty() || config.project.is_empty() {
        log::warn!(
            "[ticketbuf.backend] organization_url/project not set in {}, tracker calls will fail",
            config_path.display()
        );
    }

    let state = AppState::new(config);
    match server::spawn_server(state).await {
        Ok(port) => log::info!("[ticketbuf.backend] Ready on port {}", port),
        Err(e) => {
            log::error!("[ticketbuf.backend] Failed to start HTTP server: {}", e);
            return;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("[ticketbuf.backend] Failed to listen for shutdown signal: {}", e);
    }
    log::info!("[ticketbuf.backend] Shutting down");
}
