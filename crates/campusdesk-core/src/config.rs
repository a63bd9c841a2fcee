//! Application configuration management.
//!
//! This module handles loading and saving the console configuration, which
//! includes the identity API location, the last used username, the
//! inactivity windows and where credentials are persisted.
//!
//! Configuration is stored at `~/.config/campusdesk/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "campusdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Warning shown after 9 minutes without interaction.
const DEFAULT_IDLE_WARNING_SECS: u64 = 540;

/// Forced logout after 10 minutes without interaction.
const DEFAULT_IDLE_LOGOUT_SECS: u64 = 600;

/// Access-token lifetime assumed when the identity service omits `expiresIn`.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 1800;

const DEFAULT_LOGOUT_TIMEOUT_SECS: u64 = 5;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the credential pair is kept between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub last_username: Option<String>,
    pub idle_warning_secs: u64,
    pub idle_logout_secs: u64,
    pub default_token_ttl_secs: u64,
    pub logout_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            last_username: None,
            idle_warning_secs: DEFAULT_IDLE_WARNING_SECS,
            idle_logout_secs: DEFAULT_IDLE_LOGOUT_SECS,
            default_token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            logout_timeout_secs: DEFAULT_LOGOUT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_backend: CredentialBackend::File,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let config: Config = serde_json::from_str(&contents)?;
            Ok(config.validated())
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `CAMPUSDESK_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("CAMPUSDESK_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        self
    }

    /// Replace inconsistent idle windows with the defaults.
    pub fn validated(mut self) -> Self {
        if self.idle_warning_secs == 0
            || self.idle_logout_secs == 0
            || self.idle_warning_secs >= self.idle_logout_secs
        {
            warn!(
                warning = self.idle_warning_secs,
                logout = self.idle_logout_secs,
                "Invalid inactivity windows, using defaults"
            );
            self.idle_warning_secs = DEFAULT_IDLE_WARNING_SECS;
            self.idle_logout_secs = DEFAULT_IDLE_LOGOUT_SECS;
        }
        if self.default_token_ttl_secs == 0 {
            self.default_token_ttl_secs = DEFAULT_TOKEN_TTL_SECS;
        }
        self
    }

    pub fn idle_warning(&self) -> Duration {
        Duration::from_secs(self.idle_warning_secs)
    }

    pub fn idle_logout(&self) -> Duration {
        Duration::from_secs(self.idle_logout_secs)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_secs(self.logout_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
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

    #[test]
    fn test_defaults_match_idle_windows() {
        let config = Config::default();
        assert_eq!(config.idle_warning(), Duration::from_secs(9 * 60));
        assert_eq!(config.idle_logout(), Duration::from_secs(10 * 60));
        assert_eq!(config.default_token_ttl_secs, 1800);
        assert_eq!(config.credential_backend, CredentialBackend::File);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"last_username": "admin", "credential_backend": "keyring"}"#)
                .expect("config should parse");
        assert_eq!(config.last_username.as_deref(), Some("admin"));
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_validated_rejects_inverted_windows() {
        let config = Config {
            idle_warning_secs: 700,
            idle_logout_secs: 600,
            ..Config::default()
        }
        .validated();
        assert_eq!(config.idle_warning_secs, DEFAULT_IDLE_WARNING_SECS);
        assert_eq!(config.idle_logout_secs, DEFAULT_IDLE_LOGOUT_SECS);
    }

    #[test]
    fn test_validated_keeps_custom_windows() {
        let config = Config {
            idle_warning_secs: 60,
            idle_logout_secs: 120,
            ..Config::default()
        }
        .validated();
        assert_eq!(config.idle_warning_secs, 60);
        assert_eq!(config.idle_logout_secs, 120);
    }
}
