use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;

use super::{ClientConfig, ConfigError, SessionConfig};

/// Read an optional environment variable, treating empty values as unset.
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: format!("'{value}': {e}"),
            })
        })
        .transpose()
}

fn parse_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    env_var(name)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: format!("'{value}' is not a boolean"),
            }),
        })
        .transpose()
}

/// Parse a comma-separated version list such as `"1,2"`.
pub(crate) fn parse_version_list(name: &str, value: &str) -> Result<BTreeSet<u8>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u8>().map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: format!("'{part}': {e}"),
            })
        })
        .collect()
}

/// Build a configuration from environment variables layered over defaults.
pub(crate) fn load_from_env() -> Result<ClientConfig, ConfigError> {
    let mut session = SessionConfig::default();

    if let Some(v) = parse_env("MAX_RECONNECT_ATTEMPTS")? {
        session.max_reconnect_attempts = v;
    }
    if let Some(v) = parse_env("BACKOFF_BASE_MS")? {
        session.backoff_base_ms = v;
    }
    if let Some(v) = parse_env("BACKOFF_CAP_MS")? {
        session.backoff_cap_ms = v;
    }
    if let Some(v) = parse_bool("BACKOFF_JITTER")? {
        session.backoff_jitter = v;
    }
    if let Some(v) = parse_env("PING_INTERVAL_MS")? {
        session.ping_interval_ms = v;
    }
    if let Some(v) = parse_env("QUEUE_MAX")? {
        session.queue_max = v;
    }
    if let Some(value) = env_var("SUPPORTED_HANDSHAKE_VERSIONS") {
        session.supported_handshake_versions =
            parse_version_list("SUPPORTED_HANDSHAKE_VERSIONS", &value)?;
    }
    if let Some(v) = parse_env("HANDSHAKE_VERSION")? {
        session.handshake_version = Some(v);
    }
    if let Some(v) = parse_env("HANDSHAKE_MODEL")? {
        session.handshake_model = v;
    }
    if let Some(v) = parse_env("CONNECT_TIMEOUT_MS")? {
        session.connect_timeout_ms = v;
    }

    Ok(ClientConfig {
        endpoint_url: env_var("ENDPOINT_URL"),
        auth_token: env_var("AUTH_TOKEN"),
        session,
    })
}
