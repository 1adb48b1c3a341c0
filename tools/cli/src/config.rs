//! CLI configuration file handling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sharednotes_storage::{create_default_registry, NoteStore, DEFAULT_SERVER_URL};
use sharednotes_sync::SyncConfig;

/// Local store selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Registered backend name ("sqlite" or "memory").
    pub backend: String,
    /// Database file for file-backed stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: None,
        }
    }
}

/// Settings read from the `--config` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Notes server base URL.
    pub server_url: String,
    /// Local store.
    pub store: StoreSettings,
    /// Sync timing.
    pub sync: SyncConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            store: StoreSettings::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load the config file, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, server: Option<String>, db: Option<PathBuf>) -> Self {
        if let Some(server) = server {
            self.server_url = server;
        }
        if let Some(db) = db {
            self.store.backend = "sqlite".to_string();
            self.store.path = Some(db);
        }
        self
    }

    /// Open the configured local store.
    pub fn open_store(&self) -> Result<Arc<dyn NoteStore>> {
        let registry = create_default_registry();

        let config = match self.store.backend.as_str() {
            "sqlite" => {
                let path = match &self.store.path {
                    Some(path) => path.clone(),
                    None => default_db_path()?,
                };
                serde_json::json!({ "path": path.to_string_lossy() })
            }
            _ => serde_json::json!({}),
        };

        registry
            .resolve(&self.store.backend, config)
            .with_context(|| format!("Failed to open {} store", self.store.backend))
    }
}

/// Default database location under the platform data directory.
pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory on this platform")?;
    Ok(base.join("sharednotes").join("notes.db"))
}
