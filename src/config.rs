//! Bridge configuration.
//!
//! Read from `.dockbridge/bridge.toml`. Every field is optional; values are
//! layered file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! url = "ws://localhost:8080"
//! connect_timeout_secs = 10
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 10000
//! max_attempts = 5
//!
//! [request]
//! timeout_secs = 10
//!
//! [logs]
//! max_entries = 0   # 0 = unbounded
//! ```

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::Backoff;
use crate::errors::ConfigError;

pub const CONFIG_DIR: &str = ".dockbridge";
pub const CONFIG_FILE: &str = "bridge.toml";

pub const ENV_SERVER_URL: &str = "DOCKBRIDGE_SERVER_URL";
pub const ENV_REQUEST_TIMEOUT: &str = "DOCKBRIDGE_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Base URL of the execution service (`ws://` or `wss://`).
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_server_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSection {
    /// Upper bound on one `POST /execute` round trip.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for RequestSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsSection {
    /// Ring-buffer capacity of the session log. 0 keeps every entry.
    #[serde(default)]
    pub max_entries: usize,
}

/// Contents of `bridge.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub request: RequestSection,
    #[serde(default)]
    pub logs: LogsSection,
}

/// URLs of the two channels, derived from the server URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Streaming channel, `<server>/ws`.
    pub ws_url: String,
    /// Base for `/execute` and `/health`.
    pub http_base: String,
}

impl Endpoints {
    pub fn from_server_url(server: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: server.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(server).map_err(|e| invalid(&e.to_string()))?;
        let (ws_scheme, http_scheme) = match url.scheme() {
            "ws" | "http" => ("ws", "http"),
            "wss" | "https" => ("wss", "https"),
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        };

        let mut ws = url.clone();
        ws.set_scheme(ws_scheme)
            .map_err(|_| invalid("cannot use as a WebSocket URL"))?;
        let mut http = url;
        http.set_scheme(http_scheme)
            .map_err(|_| invalid("cannot use as an HTTP URL"))?;

        Ok(Self {
            ws_url: format!("{}/ws", ws.as_str().trim_end_matches('/')),
            http_base: http.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn execute_url(&self) -> String {
        format!("{}/execute", self.http_base)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.http_base)
    }
}

impl BridgeConfig {
    /// Location of the config file inside a project directory.
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse bridge.toml")
    }

    /// Load `.dockbridge/bridge.toml` under `project_dir`, or defaults if absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = Self::config_path(project_dir);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize bridge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.trim().is_empty()) {
            self.server.url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT) {
            self.request.timeout_secs =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_REQUEST_TIMEOUT.to_string(),
                        value: raw.clone(),
                    })?;
        }
        Ok(())
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server.url = url.into();
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect.base_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
            self.reconnect.max_attempts,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        Endpoints::from_server_url(&self.server.url)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.url.trim().is_empty() {
            warnings.push("server.url is empty".to_string());
        } else {
            match Url::parse(&self.server.url) {
                Ok(url) if !matches!(url.scheme(), "ws" | "wss") => warnings.push(format!(
                    "server.url '{}' should use ws:// or wss://",
                    self.server.url
                )),
                Ok(_) => {}
                Err(e) => warnings.push(format!(
                    "server.url '{}' is not a valid URL: {}",
                    self.server.url, e
                )),
            }
        }

        if self.server.connect_timeout_secs == 0 {
            warnings.push("server.connect_timeout_secs is 0; every connect will time out".to_string());
        }
        if self.request.timeout_secs == 0 {
            warnings.push("request.timeout_secs is 0; every run will time out".to_string());
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            warnings.push(format!(
                "reconnect.base_delay_ms ({}) is greater than reconnect.max_delay_ms ({})",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    // =========================================
    // Parsing
    // =========================================

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.server.url, "ws://localhost:8080");
        assert_eq!(config.request.timeout_secs, 10);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.logs.max_entries, 0);
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = BridgeConfig::parse(
            r#"
[server]
url = "wss://dock.example.com"

[reconnect]
max_attempts = 3
"#,
        )
        .unwrap();
        assert_eq!(config.server.url, "wss://dock.example.com");
        assert_eq!(config.server.connect_timeout_secs, 10);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = BridgeConfig::parse("[server\nurl = 1").unwrap_err();
        assert!(err.to_string().contains("Failed to parse bridge.toml"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut config = BridgeConfig::default();
        config.logs.max_entries = 200;
        let path = BridgeConfig::config_path(dir.path());
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = BridgeConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    // =========================================
    // Environment
    // =========================================

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            (ENV_SERVER_URL, "ws://10.0.0.5:9000"),
            (ENV_REQUEST_TIMEOUT, "30"),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.url, "ws://10.0.0.5:9000");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_env_invalid_timeout() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_env_from(|k| (k == ENV_REQUEST_TIMEOUT).then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_REQUEST_TIMEOUT.to_string(),
                value: "soon".to_string()
            }
        );
    }

    #[test]
    fn test_env_blank_url_ignored() {
        let mut config = BridgeConfig::default();
        config
            .apply_env_from(|k| (k == ENV_SERVER_URL).then(|| "  ".to_string()))
            .unwrap();
        assert_eq!(config.server.url, "ws://localhost:8080");
    }

    // =========================================
    // Endpoints
    // =========================================

    #[test]
    fn test_endpoints_ws() {
        let endpoints = Endpoints::from_server_url("ws://localhost:8080").unwrap();
        assert_eq!(endpoints.ws_url, "ws://localhost:8080/ws");
        assert_eq!(endpoints.execute_url(), "http://localhost:8080/execute");
        assert_eq!(endpoints.health_url(), "http://localhost:8080/health");
    }

    #[test]
    fn test_endpoints_wss_keeps_path() {
        let endpoints = Endpoints::from_server_url("wss://dock.example.com/bridge/").unwrap();
        assert_eq!(endpoints.ws_url, "wss://dock.example.com/bridge/ws");
        assert_eq!(endpoints.http_base, "https://dock.example.com/bridge");
    }

    #[test]
    fn test_endpoints_reject_other_schemes() {
        assert!(matches!(
            Endpoints::from_server_url("ftp://dock"),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Endpoints::from_server_url("not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    // =========================================
    // Validation
    // =========================================

    #[test]
    fn test_validate_defaults_clean() {
        assert!(BridgeConfig::default().validate().is_empty());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = BridgeConfig::default().with_server_url("http://localhost:8080");
        config.request.timeout_secs = 0;
        config.reconnect.base_delay_ms = 20_000;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
        assert!(warnings.iter().any(|w| w.contains("ws://")));
        assert!(warnings.iter().any(|w| w.contains("request.timeout_secs")));
        assert!(warnings.iter().any(|w| w.contains("base_delay_ms")));
    }

    #[test]
    fn test_backoff_from_config() {
        let backoff = BridgeConfig::default().backoff();
        assert_eq!(backoff, Backoff::default());
    }
}
