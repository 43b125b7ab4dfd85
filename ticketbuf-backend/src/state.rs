/// Shared application state passed to axum handlers.
use std::sync::Arc;

use crate::client::RestStore;
use crate::config::BackendConfig;
use ticketbuf_core::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry<RestStore>>,
    pub config: Arc<BackendConfig>,
}

impl AppState {
    pub fn new(config: BackendConfig) -> Self {
        let store = Arc::new(RestStore::new(&config));
        let sessions = Arc::new(SessionRegistry::new(store, config.buffer.clone()));
        Self {
            sessions,
            config: Arc::new(config),
        }
    }
}
