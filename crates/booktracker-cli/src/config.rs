//! Persistent CLI configuration.

use std::env;
use std::path::{Path, PathBuf};

use booktracker_core::config::SyncSettings;
use booktracker_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "booktracker.db";

pub const ENV_DATABASE_ID: &str = "NOTION_DATABASE_ID";
pub const ENV_API_BASE_URL: &str = "NOTION_API_BASE_URL";
pub const ENV_DB_PATH: &str = "BOOKTRACKER_DB_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            db_path: None,
            sync: SyncSettings::default(),
        }
    }
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("booktracker").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("booktracker")
        .join(DB_FILE_NAME)
}

impl CliConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        config
            .sync
            .validate()
            .map_err(|error| format!("Invalid config at {}: {}", path.display(), error))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Settings with environment overrides applied
    pub fn effective_sync_settings(&self) -> SyncSettings {
        let mut settings = self.sync.clone();
        if let Some(database_id) = normalize_text_option(env::var(ENV_DATABASE_ID).ok()) {
            settings.notion_database_id = Some(database_id);
        }
        if let Some(base_url) = normalize_text_option(env::var(ENV_API_BASE_URL).ok()) {
            settings.notion_api_base_url = base_url;
        }
        settings.normalized()
    }

    /// Database path: flag, then environment, then config, then the data dir
    pub fn resolve_db_path(&self, cli_db_path: Option<PathBuf>) -> PathBuf {
        cli_db_path
            .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(default_db_path)
    }

    fn normalize(&mut self) {
        self.sync = self.sync.clone().normalized();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booktracker_core::sync::AutoResolvePolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn config_roundtrip_normalizes_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliConfig::default();
        config.sync.notion_database_id = Some(" abc123 ".to_string());
        config.sync.notion_api_base_url = "https://api.notion.com/".to_string();
        config.sync.auto_resolve_policy = AutoResolvePolicy::Local;
        config.db_path = Some(PathBuf::from("/tmp/books.db"));

        config.save_to_path(&path).unwrap();
        let loaded = CliConfig::load_from_path(&path).unwrap();

        assert_eq!(loaded.sync.notion_database_id.as_deref(), Some("abc123"));
        assert_eq!(loaded.sync.notion_api_base_url, "https://api.notion.com");
        assert_eq!(loaded.sync.auto_resolve_policy, AutoResolvePolicy::Local);
        assert_eq!(loaded.db_path, Some(PathBuf::from("/tmp/books.db")));
    }

    #[test]
    fn invalid_settings_are_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"sync":{"retry_max_attempts":0}}"#).unwrap();

        let error = CliConfig::load_from_path(&path).unwrap_err();
        assert!(error.contains("retry_max_attempts"));
        assert!(error.contains(&path.display().to_string()));
    }

    #[test]
    fn explicit_db_path_wins() {
        let config = CliConfig {
            db_path: Some(PathBuf::from("/from/config.db")),
            ..CliConfig::default()
        };
        assert_eq!(
            config.resolve_db_path(Some(PathBuf::from("/from/flag.db"))),
            PathBuf::from("/from/flag.db")
        );
    }
}
