//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STREAMMGR_CONFIG or an explicit path)
//! 3. Environment variables

use crate::connection::{ConnectionConfig, Endpoint};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use streammgr_protocol::DEFAULT_PORT;

/// Client configuration as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon host for TCP connections.
    pub host: String,
    /// Daemon port for TCP connections.
    pub port: u16,
    /// Unix domain socket path; takes precedence over host/port when set.
    pub socket_path: Option<PathBuf>,
    /// Token sent in the Connect handshake.
    pub auth_token: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            socket_path: None,
            auth_token: None,
            connect_timeout_ms: 3_000,
            request_timeout_ms: 60_000,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `path`, or from the file named by
    /// `STREAMMGR_CONFIG`, then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("STREAMMGR_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Writes configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, ignoring values that do not parse.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("STREAM_MANAGER_SERVER_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("STREAM_MANAGER_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }

        if let Some(path) = lookup("STREAMMGR_SOCKET") {
            self.socket_path = Some(PathBuf::from(path));
        }

        if let Some(token) = lookup("AWS_CONTAINER_AUTHORIZATION_TOKEN") {
            self.auth_token = Some(token);
        }

        if let Some(ms) = lookup("STREAMMGR_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.connect_timeout_ms = ms;
            }
        }

        if let Some(ms) = lookup("STREAMMGR_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.request_timeout_ms = ms;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_path.is_none() && self.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "host must not be empty".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        match &self.socket_path {
            Some(path) => Endpoint::unix(path),
            None => Endpoint::tcp(&self.host, self.port),
        }
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.endpoint())
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms));
        config.auth_token = self.auth_token.clone();
        config
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint(), Endpoint::tcp("127.0.0.1", 8088));

        let conn = config.to_connection_config();
        assert_eq!(conn.connect_timeout, Duration::from_secs(3));
        assert_eq!(conn.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STREAM_MANAGER_SERVER_HOST", "10.0.0.5"),
            ("STREAM_MANAGER_SERVER_PORT", "9000"),
            ("AWS_CONTAINER_AUTHORIZATION_TOKEN", "tok"),
            ("STREAMMGR_REQUEST_TIMEOUT_MS", "1500"),
            ("STREAMMGR_CONNECT_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint(), Endpoint::tcp("10.0.0.5", 9000));
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.request_timeout_ms, 1500);
        // Unparseable values leave the previous setting
        assert_eq!(config.connect_timeout_ms, 3_000);
    }

    #[test]
    fn test_socket_path_takes_precedence() {
        let mut config = ClientConfig::default();
        config.apply_overrides(|key| {
            (key == "STREAMMGR_SOCKET").then(|| "/run/streammgr.sock".to_string())
        });
        assert_eq!(config.endpoint(), Endpoint::unix("/run/streammgr.sock"));
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        std::fs::write(&path, "host: edge-host\nport: 7000\nrequest_timeout_ms: 500\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "edge-host");
        assert_eq!(config.port, 7000);
        assert_eq!(config.request_timeout_ms, 500);
        // Missing keys take defaults
        assert_eq!(config.connect_timeout_ms, 3_000);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");

        let config = ClientConfig {
            auth_token: Some("tok".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::from_file("/nonexistent/client.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_, _)));
        assert!(err.to_string().contains("/nonexistent/client.yaml"));
    }

    #[test]
    fn test_validate() {
        let config = ClientConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ClientConfig::default().validate().is_ok());
    }
}
