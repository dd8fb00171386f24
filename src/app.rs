use directories::{BaseDirs, ProjectDirs};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, Result};

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("com", "marketplace", "MarketplaceClient"));

pub const ENV_API_URL: &str = "MARKETPLACE_API_URL";
pub const ENV_SOCKET_URL: &str = "MARKETPLACE_SOCKET_URL";
pub const ENV_TOKEN: &str = "MARKETPLACE_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub base_url: String,
    /// Socket host; the API host is used when unset.
    pub socket_url: Option<String>,
    /// Event emitted once connected to enter the per-user room.
    pub join_event: String,
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            socket_url: None,
            join_event: "join".to_string(),
            token: None,
            request_timeout_secs: 15,
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
    // TOML is the primary format; a legacy JSON state file is converted on first load
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("marketplace").join("client.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        PROJECT_DIRS.as_ref().map(|p| p.config_dir().join("state.json"))
    }

    /// Load from the user config dir, then apply environment overrides.
    pub fn load() -> Self {
        let mut state = match (Self::toml_path(), Self::legacy_json_path()) {
            (Some(toml), legacy) => Self::load_from(&toml, legacy.as_deref()),
            (None, _) => Self::new(),
        };
        state.apply_overrides(|key| std::env::var(key).ok());
        state
    }

    pub fn load_from(toml_path: &Path, legacy_json: Option<&Path>) -> Self {
        if let Ok(text) = fs::read_to_string(toml_path) {
            match toml::from_str::<AppState>(&text) {
                Ok(state) => return state,
                Err(e) => warn!("Ignoring malformed {}: {e}", toml_path.display()),
            }
        }

        if let Some(legacy) = legacy_json {
            if let Ok(bytes) = fs::read(legacy) {
                if let Ok(state) = serde_json::from_slice::<AppState>(&bytes) {
                    info!("Migrating {} to {}", legacy.display(), toml_path.display());
                    if let Err(e) = state.save_to(toml_path) {
                        warn!("Could not write migrated config: {e}");
                    }
                    return state;
                }
            }
        }

        Self::new()
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(url) = lookup(ENV_SOCKET_URL).filter(|v| !v.trim().is_empty()) {
            self.socket_url = Some(url);
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.token = Some(token);
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| ClientError::Config("No config dir".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ClientError::Config(e.to_string()))?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        fs::write(path, toml).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn api_url(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Config(format!("API URL not set (config file or {ENV_API_URL})")));
        }
        Ok(Url::parse(&crate::utils::normalize_url(&self.base_url))?)
    }

    pub fn socket_endpoint(&self) -> Result<Url> {
        let host = self
            .socket_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.base_url);
        if host.trim().is_empty() {
            return Err(ClientError::Config("socket URL not set".into()));
        }
        crate::utils::socket_url(host)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
