//! SDK configuration management.
//!
//! This module handles loading and saving the configuration, which includes
//! the API client id, the authentication service URL, the generated device
//! id and the last used username.
//!
//! Configuration is stored at `~/.config/travelkit/config.json`.
//! `TRAVELKIT_CLIENT_ID` and `TRAVELKIT_AUTH_URL` override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "travelkit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_CLIENT_ID: &str = "travelkit-sdk";
const DEFAULT_AUTH_URL: &str = "https://auth.sygic.com";

const ENV_CLIENT_ID: &str = "TRAVELKIT_CLIENT_ID";
const ENV_AUTH_URL: &str = "TRAVELKIT_AUTH_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client_id: String,
    pub auth_url: String,
    /// Stable per-install identifier sent with device session requests
    pub device_id: Option<String>,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            device_id: None,
            last_username: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(
            std::env::var(ENV_CLIENT_ID).ok(),
            std::env::var(ENV_AUTH_URL).ok(),
        );
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_overrides(&mut self, client_id: Option<String>, auth_url: Option<String>) {
        if let Some(client_id) = client_id.filter(|v| !v.trim().is_empty()) {
            self.client_id = client_id;
        }
        if let Some(auth_url) = auth_url.filter(|v| !v.trim().is_empty()) {
            self.auth_url = auth_url;
        }
    }

    /// Device id, generated on first use. Returns true if a new one was minted
    /// and the config needs saving.
    pub fn ensure_device_id(&mut self) -> bool {
        if self.device_id.as_deref().is_some_and(|id| !id.is_empty()) {
            return false;
        }
        let bytes: [u8; 16] = rand::thread_rng().gen();
        self.device_id = Some(hex::encode(bytes));
        true
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn temp_path() -> PathBuf {
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        std::env::temp_dir()
            .join(format!("travelkit-config-{}", hex::encode(suffix)))
            .join(CONFIG_FILE)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from(&temp_path()).expect("load");
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert!(config.device_id.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, r#"{"last_username":"jane"}"#).expect("write");

        let config = Config::load_from(&path).expect("load");
        assert_eq!(config.last_username.as_deref(), Some("jane"));
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);

        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_path();
        let mut config = Config::default();
        assert!(config.ensure_device_id());
        config.save_to(&path).expect("save");

        let reloaded = Config::load_from(&path).expect("load");
        assert_eq!(reloaded.device_id, config.device_id);

        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn test_ensure_device_id_is_stable() {
        let mut config = Config::default();
        assert!(config.ensure_device_id());
        let first = config.device_id.clone();
        assert!(!config.ensure_device_id());
        assert_eq!(config.device_id, first);
        assert_eq!(first.map(|id| id.len()), Some(32));
    }

    #[test]
    fn test_overrides_ignore_blank_values() {
        let mut config = Config::default();
        config.apply_overrides(Some("custom".into()), Some("  ".into()));
        assert_eq!(config.client_id, "custom");
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
    }
}
