//! Configuration module for voice sessions
//!
//! This module handles client configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_session::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("session.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Queue capacity: {}", config.session.queue_max);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

mod env;
mod validation;
mod yaml;

pub use validation::validate_session_config;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_QUEUE_MAX: usize = 32;
pub const DEFAULT_HANDSHAKE_VERSION: u8 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for one voice session.
///
/// Every field has a default, so a partial YAML section or an empty
/// environment still produces a usable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reconnect attempts before the session closes with `ReconnectExhausted`.
    /// 0 retries forever.
    pub max_reconnect_attempts: u32,

    /// First reconnect delay; later attempts double it.
    pub backoff_base_ms: u64,

    /// Upper bound on any reconnect delay.
    pub backoff_cap_ms: u64,

    /// Add up to ±25% jitter to reconnect delays (still capped).
    pub backoff_jitter: bool,

    /// Keepalive interval. A connection with no inbound frame for twice this
    /// long is considered stalled.
    pub ping_interval_ms: u64,

    /// Maximum number of outbound audio chunks awaiting a queue-drained signal.
    pub queue_max: usize,

    /// Server handshake versions this client accepts.
    pub supported_handshake_versions: BTreeSet<u8>,

    /// Version the client offers in its own handshake. Defaults to the highest
    /// supported version.
    pub handshake_version: Option<u8>,

    /// Model byte the client offers in its own handshake.
    pub handshake_model: u8,

    /// Bound on a single connection attempt.
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            backoff_jitter: false,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            queue_max: DEFAULT_QUEUE_MAX,
            supported_handshake_versions: BTreeSet::from([DEFAULT_HANDSHAKE_VERSION]),
            handshake_version: None,
            handshake_model: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    /// Version sent in the client handshake.
    pub fn offered_handshake_version(&self) -> u8 {
        self.handshake_version
            .or_else(|| self.supported_handshake_versions.last().copied())
            .unwrap_or(DEFAULT_HANDSHAKE_VERSION)
    }

    pub fn supports_version(&self, version: u8) -> bool {
        self.supported_handshake_versions.contains(&version)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Client configuration: where to connect, how to authenticate, and the
/// session tunables.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Default endpoint for `connect` when none is given on the command line.
    pub endpoint_url: Option<String>,
    /// Bearer token for the WebSocket upgrade request.
    pub auth_token: Option<String>,
    pub session: SessionConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("session", &self.session)
            .finish()
    }
}

/// Zeroize the auth token when the configuration is dropped.
impl Drop for ClientConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut token) = self.auth_token {
            token.zeroize();
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// The `.env` file is loaded by the binary at startup, so its values are
    /// already visible here as environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let mut config = env::load_from_env()?;
        yaml_config.apply_to(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Validate the session tunables and, when set, the endpoint URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_session_config(&self.session)?;
        if let Some(endpoint) = self.endpoint_url.as_deref() {
            validation::validate_endpoint_url(endpoint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("ENDPOINT_URL");
            env::remove_var("AUTH_TOKEN");
            env::remove_var("MAX_RECONNECT_ATTEMPTS");
            env::remove_var("BACKOFF_BASE_MS");
            env::remove_var("BACKOFF_CAP_MS");
            env::remove_var("BACKOFF_JITTER");
            env::remove_var("PING_INTERVAL_MS");
            env::remove_var("QUEUE_MAX");
            env::remove_var("SUPPORTED_HANDSHAKE_VERSIONS");
            env::remove_var("HANDSHAKE_VERSION");
            env::remove_var("HANDSHAKE_MODEL");
            env::remove_var("CONNECT_TIMEOUT_MS");
        }
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.backoff_base_ms, 500);
        assert_eq!(config.backoff_cap_ms, 30_000);
        assert!(!config.backoff_jitter);
        assert_eq!(config.ping_interval_ms, 5_000);
        assert_eq!(config.queue_max, 32);
        assert_eq!(config.supported_handshake_versions, BTreeSet::from([1]));
        assert_eq!(config.offered_handshake_version(), 1);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_offered_version_prefers_explicit_setting() {
        let mut config = SessionConfig {
            supported_handshake_versions: BTreeSet::from([1, 2, 3]),
            ..Default::default()
        };
        assert_eq!(config.offered_handshake_version(), 3);

        config.handshake_version = Some(2);
        assert_eq!(config.offered_handshake_version(), 2);
        assert!(config.supports_version(1));
        assert!(!config.supports_version(9));
    }

    #[test]
    fn test_debug_redacts_auth_token() {
        let mut config = ClientConfig::default();
        config.auth_token = Some("super-secret".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.endpoint_url, None);
        assert_eq!(config.auth_token, None);
        assert_eq!(config.session, SessionConfig::default());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();

        unsafe {
            env::set_var("ENDPOINT_URL", "wss://voice.example.com/v1");
            env::set_var("AUTH_TOKEN", "env-token");
            env::set_var("QUEUE_MAX", "8");
            env::set_var("PING_INTERVAL_MS", "1000");
            env::set_var("SUPPORTED_HANDSHAKE_VERSIONS", "1, 2");
            env::set_var("BACKOFF_JITTER", "true");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(
            config.endpoint_url,
            Some("wss://voice.example.com/v1".to_string())
        );
        assert_eq!(config.auth_token, Some("env-token".to_string()));
        assert_eq!(config.session.queue_max, 8);
        assert_eq!(config.session.ping_interval_ms, 1000);
        assert_eq!(
            config.session.supported_handshake_versions,
            BTreeSet::from([1, 2])
        );
        assert!(config.session.backoff_jitter);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();

        unsafe {
            env::set_var("QUEUE_MAX", "lots");
        }

        let err = ClientConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("QUEUE_MAX"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_queue() {
        cleanup_env_vars();

        unsafe {
            env::set_var("QUEUE_MAX", "0");
        }

        let err = ClientConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("queue_max"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("session.yaml");

        let yaml_content = r#"
client:
  endpoint_url: "wss://voice.example.com/v1"
  auth_token: "yaml-token"

session:
  max_reconnect_attempts: 3
  backoff_base_ms: 250
  queue_max: 4
  supported_handshake_versions: [1, 2]
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = ClientConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.endpoint_url,
            Some("wss://voice.example.com/v1".to_string())
        );
        assert_eq!(config.auth_token, Some("yaml-token".to_string()));
        assert_eq!(config.session.max_reconnect_attempts, 3);
        assert_eq!(config.session.backoff_base_ms, 250);
        assert_eq!(config.session.queue_max, 4);
        assert_eq!(config.session.offered_handshake_version(), 2);
        // Untouched fields keep their defaults
        assert_eq!(config.session.ping_interval_ms, DEFAULT_PING_INTERVAL_MS);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("session.yaml");

        let yaml_content = r#"
session:
  queue_max: 16
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("QUEUE_MAX", "64");
            env::set_var("PING_INTERVAL_MS", "2000");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.session.queue_max, 16);
        // ENV value
        assert_eq!(config.session.ping_interval_ms, 2000);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/session.yaml");
        let result = ClientConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: [content").unwrap();

        let result = ClientConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_invalid_endpoint() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("session.yaml");

        fs::write(
            &config_path,
            "client:\n  endpoint_url: \"https://voice.example.com\"\n",
        )
        .unwrap();

        let err = ClientConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("endpoint_url"));

        cleanup_env_vars();
    }
}
