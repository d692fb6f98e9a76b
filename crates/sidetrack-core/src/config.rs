//! Application configuration management.
//!
//! Configuration is stored at `~/.config/sidetrack/config.json`. Values from
//! the environment (`SIDETRACK_API_URL`, `SIDETRACK_TIMEOUT_SECS`,
//! `SIDETRACK_SESSION_BACKEND`) override the file for the current run and are
//! never written back.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::SessionBackend;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sidetrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend used when nothing is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// HTTP timeout for each exchange, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_URL: &str = "SIDETRACK_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "SIDETRACK_TIMEOUT_SECS";
pub const ENV_SESSION_BACKEND: &str = "SIDETRACK_SESSION_BACKEND";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub last_email: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub session_backend: SessionBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_url(),
            last_email: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            session_backend: SessionBackend::default(),
        }
    }
}

impl Config {
    /// Load the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// The file alone, without environment overrides. Used before saving so
    /// an override never gets persisted.
    pub fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
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
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Remember the last login email in the config file.
    pub fn remember_email(email: &str) -> Result<()> {
        let mut stored = Self::load_file()?;
        stored.last_email = Some(email.trim().to_string());
        stored.save()
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored with a
    /// warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT_SECS),
            }
        }
        if let Some(raw) = lookup(ENV_SESSION_BACKEND) {
            match raw.parse::<SessionBackend>() {
                Ok(backend) => self.session_backend = backend,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {}", ENV_SESSION_BACKEND),
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// `<cache_dir>/sidetrack`, home of the session files.
    pub fn app_cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Per-user data cache, so two accounts never see each other's projects.
    pub fn user_cache_dir(&self, user_id: &str) -> Result<PathBuf> {
        let safe: String = user_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if safe.is_empty() {
            anyhow::bail!("Invalid user id for cache directory: '{}'", user_id);
        }
        Ok(self.app_cache_dir()?.join(safe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"last_email":"ada@example.com"}"#).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.session_backend, SessionBackend::File);
        assert_eq!(config.last_email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            (ENV_API_URL, "https://api.sidetrack.dev "),
            (ENV_TIMEOUT_SECS, "5"),
            (ENV_SESSION_BACKEND, "sealed"),
        ]));
        assert_eq!(config.api_base_url, "https://api.sidetrack.dev");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.session_backend, SessionBackend::Sealed);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[
            (ENV_API_URL, "  "),
            (ENV_TIMEOUT_SECS, "0"),
            (ENV_SESSION_BACKEND, "floppy"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_session_backend_serializes_lowercase() {
        let config = Config {
            session_backend: SessionBackend::Keyring,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""session_backend":"keyring""#));
    }

    #[test]
    fn test_user_cache_dir_is_sanitized() {
        let config = Config::default();
        if let Ok(dir) = config.user_cache_dir("64f1/../x") {
            assert!(dir.ends_with("64f1x"));
        }
        assert!(config.user_cache_dir("../..").is_err());
    }
}
