use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub credentials_file: PathBuf,
    pub sync: SyncSettings,
    pub rules: RuleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Messages requested per list call.
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub first_match_wins: bool,
    /// Mirror rule actions to Gmail, not just the local database.
    pub sync_remote: bool,
    pub provider_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:gmail_rules.db?mode=rwc".to_string(),
            credentials_file: PathBuf::from("credentials.json"),
            sync: SyncSettings::default(),
            rules: RuleSettings::default(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            first_match_wins: false,
            sync_remote: true,
            provider_timeout_secs: 30,
        }
    }
}

impl RuleSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

impl Config {
    /// Load settings from `path`. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.database_url, "sqlite:gmail_rules.db?mode=rwc");
        assert_eq!(config.sync.page_size, 500);
        assert!(config.rules.sync_remote);
        assert!(!config.rules.first_match_wins);
        assert_eq!(config.rules.provider_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_override() {
        let config = Config::parse(
            r#"
            database_url = "sqlite::memory:"

            [rules]
            first_match_wins = true
            provider_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(config.rules.first_match_wins);
        assert!(config.rules.sync_remote);
        assert_eq!(config.rules.provider_timeout_secs, 5);
        assert_eq!(config.credentials_file, PathBuf::from("credentials.json"));
    }

    #[test]
    fn test_malformed_settings_error() {
        assert!(Config::parse("[rules]\nfirst_match_wins = \"yes\"").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(config.sync.page_size, 500);
    }
}
