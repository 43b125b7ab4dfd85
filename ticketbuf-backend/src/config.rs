/// Configuration for the ticketbuf backend.
/// Reads config.json from ~/.config/ticketbuf/config.json (or platform equivalent).
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use ticketbuf_core::config::BufferConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// e.g. https://dev.azure.com/contoso
    #[serde(default)]
    pub organization_url: String,
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Environment variable holding the personal access token.
    #[serde(default = "default_pat_env")]
    pub pat_env: String,
    /// Area path new items are filed under.
    #[serde(default)]
    pub area_path: Option<String>,
    /// Workflow states in display order, used when a session names none.
    #[serde(default = "default_states")]
    pub states: Vec<String>,
    /// Board columns in display order; "" is the unplaced bucket.
    #[serde(default = "default_board_columns")]
    pub board_columns: Vec<String>,
    /// State an item is moved to instead of being destroyed.
    #[serde(default = "default_removed_state")]
    pub removed_state: String,
    /// Field reference holding the board column.
    #[serde(default = "default_board_column_field")]
    pub board_column_field: String,
    #[serde(default)]
    pub buffer: BufferConfig,
}

fn default_port() -> u16 {
    8087
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_version() -> String {
    "7.1".to_string()
}

fn default_pat_env() -> String {
    "TICKETBUF_PAT".to_string()
}

fn default_states() -> Vec<String> {
    ["New", "Active", "Resolved", "Closed"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_board_columns() -> Vec<String> {
    ["New", "Active", "Resolved", "Closed", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_removed_state() -> String {
    "Removed".to_string()
}

fn default_board_column_field() -> String {
    "System.BoardColumn".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            organization_url: String::new(),
            project: String::new(),
            api_version: default_api_version(),
            pat_env: default_pat_env(),
            area_path: None,
            states: default_states(),
            board_columns: default_board_columns(),
            removed_state: default_removed_state(),
            board_column_field: default_board_column_field(),
            buffer: BufferConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Token from the configured environment variable, if set.
    pub fn pat(&self) -> Option<String> {
        std::env::var(&self.pat_env).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Default config path: ~/.config/ticketbuf/config.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ticketbuf")
        .join("config.json")
}

/// Load config from path. Returns default if file doesn't exist.
pub fn load_config(path: &Path) -> BackendConfig {
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            log::warn!("[ticketbuf.config] Failed to parse config {}: {}", path.display(), e);
            BackendConfig::default()
        }),
        Err(_) => {
            log::info!("[ticketbuf.config] No config at {}, using defaults", path.display());
            BackendConfig::default()
        }
    }
}

fn parse_config(content: &str) -> Result<BackendConfig, serde_json::Error> {
    serde_json::from_str(content)
}
