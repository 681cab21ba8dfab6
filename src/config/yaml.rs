use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{ClientConfig, ConfigError};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// client:
///   endpoint_url: "wss://voice.example.com/v1/session"
///   auth_token: "your-token"
///
/// session:
///   max_reconnect_attempts: 5
///   backoff_base_ms: 500
///   backoff_cap_ms: 30000
///   backoff_jitter: false
///   ping_interval_ms: 5000
///   queue_max: 32
///   supported_handshake_versions: [1]
///   handshake_version: 1
///   handshake_model: 0
///   connect_timeout_ms: 10000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub client: Option<ClientYaml>,
    pub session: Option<SessionYaml>,
}

/// Connection target and credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ClientYaml {
    pub endpoint_url: Option<String>,
    pub auth_token: Option<String>,
}

/// Session tunables from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub max_reconnect_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub backoff_jitter: Option<bool>,
    pub ping_interval_ms: Option<u64>,
    pub queue_max: Option<usize>,
    pub supported_handshake_versions: Option<BTreeSet<u8>>,
    pub handshake_version: Option<u8>,
    pub handshake_model: Option<u8>,
    pub connect_timeout_ms: Option<u64>,
}

impl YamlConfig {
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;

        Ok(config)
    }

    /// Overlay every value present in the file onto `config`.
    pub fn apply_to(self, config: &mut ClientConfig) {
        if let Some(client) = self.client {
            if client.endpoint_url.is_some() {
                config.endpoint_url = client.endpoint_url;
            }
            if client.auth_token.is_some() {
                config.auth_token = client.auth_token;
            }
        }

        let Some(session) = self.session else {
            return;
        };
        let target = &mut config.session;

        if let Some(v) = session.max_reconnect_attempts {
            target.max_reconnect_attempts = v;
        }
        if let Some(v) = session.backoff_base_ms {
            target.backoff_base_ms = v;
        }
        if let Some(v) = session.backoff_cap_ms {
            target.backoff_cap_ms = v;
        }
        if let Some(v) = session.backoff_jitter {
            target.backoff_jitter = v;
        }
        if let Some(v) = session.ping_interval_ms {
            target.ping_interval_ms = v;
        }
        if let Some(v) = session.queue_max {
            target.queue_max = v;
        }
        if let Some(v) = session.supported_handshake_versions {
            target.supported_handshake_versions = v;
        }
        if let Some(v) = session.handshake_version {
            target.handshake_version = Some(v);
        }
        if let Some(v) = session.handshake_model {
            target.handshake_model = v;
        }
        if let Some(v) = session.connect_timeout_ms {
            target.connect_timeout_ms = v;
        }
    }
}
