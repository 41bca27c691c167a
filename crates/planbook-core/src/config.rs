use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHANNEL_NAME, ENV_API_KEY, ENV_REMOTE_URL, HEARTBEAT_INTERVAL_MS, JOIN_TIMEOUT_MS,
    UPDATE_DEBOUNCE_MS,
};
use crate::error::CoreError;
use crate::sync::ReconnectPolicy;

/// Core configuration, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub remote: RemoteConfig,
    pub realtime: RealtimeConfig,
    pub reconnect: ReconnectPolicy,
    /// Quiet period for debounced plan updates
    pub debounce_ms: u64,
    /// Log every realtime payload at info level
    pub verbose: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            realtime: RealtimeConfig::default(),
            reconnect: ReconnectPolicy::default(),
            debounce_ms: UPDATE_DEBOUNCE_MS,
            verbose: false,
        }
    }
}

/// Where the hosted database lives and how to authenticate against it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    pub api_key: String,
    /// User session token; the api key is used as bearer when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub schema: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            access_token: None,
            schema: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    pub channel: String,
    pub join_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL_NAME.to_string(),
            join_timeout_ms: JOIN_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl CoreConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied either way.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(
            std::env::var(ENV_REMOTE_URL).ok(),
            std::env::var(ENV_API_KEY).ok(),
        );
        Ok(config)
    }

    /// `<config_dir>/planbook/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("planbook").join("config.json"))
    }

    pub fn apply_overrides(&mut self, url: Option<String>, api_key: Option<String>) {
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            self.remote.url = url;
        }
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.remote.api_key = key;
        }
    }

    /// A remote URL and API key are required to talk to the hosted store.
    pub fn validate_remote(&self) -> Result<(), CoreError> {
        if self.remote.url.is_empty() {
            return Err(CoreError::Config {
                message: format!("remote url missing (set remote.url or {})", ENV_REMOTE_URL),
            });
        }
        if self.remote.api_key.is_empty() {
            return Err(CoreError::Config {
                message: format!("api key missing (set remote.apiKey or {})", ENV_API_KEY),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config_minimal() {
        let config: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.debounce_ms, 150);
        assert_eq!(config.realtime.channel, "realtime");
        assert_eq!(config.remote.schema, "public");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.realtime.join_timeout_ms, 5_000);
        assert!(!config.verbose);
    }

    #[test]
    fn test_parse_config_camel_case() {
        let json = r#"{
            "remote": {"url": "https://x.example.co", "apiKey": "anon", "accessToken": "jwt"},
            "realtime": {"joinTimeoutMs": 500},
            "reconnect": {"baseDelayMs": 10, "maxDelayMs": 100, "maxAttempts": 2},
            "debounceMs": 20,
            "verbose": true
        }"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.remote.api_key, "anon");
        assert_eq!(config.remote.access_token.as_deref(), Some("jwt"));
        assert_eq!(config.realtime.join_timeout_ms, 500);
        assert_eq!(config.realtime.heartbeat_interval_ms, 25_000);
        assert_eq!(config.reconnect.base_delay_ms, 10);
        assert_eq!(config.debounce_ms, 20);
        assert!(config.verbose);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"remote": {{"url": "http://localhost:54321"}}}}"#).unwrap();

        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.remote.url, "http://localhost:54321");
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = CoreConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_overrides_replace_non_empty_values() {
        let mut config = CoreConfig::default();
        config.remote.api_key = "from-file".to_string();
        config.apply_overrides(Some("https://env.example.co".to_string()), Some(String::new()));
        assert_eq!(config.remote.url, "https://env.example.co");
        assert_eq!(config.remote.api_key, "from-file");
    }

    #[test]
    fn test_validate_remote_requires_url_and_key() {
        let mut config = CoreConfig::default();
        assert!(matches!(
            config.validate_remote(),
            Err(CoreError::Config { .. })
        ));
        config.remote.url = "https://x.example.co".to_string();
        config.remote.api_key = "anon".to_string();
        assert!(config.validate_remote().is_ok());
    }
}
