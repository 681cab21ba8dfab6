use super::{ConfigError, SessionConfig};
use crate::utils::validate_endpoint;

/// Reject session tunables the state machine cannot run with.
pub fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.queue_max == 0 {
        return Err(ConfigError::Invalid(
            "queue_max must be at least 1".to_string(),
        ));
    }
    if config.ping_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "ping_interval_ms must be greater than 0".to_string(),
        ));
    }
    if config.backoff_base_ms == 0 {
        return Err(ConfigError::Invalid(
            "backoff_base_ms must be greater than 0".to_string(),
        ));
    }
    if config.backoff_cap_ms < config.backoff_base_ms {
        return Err(ConfigError::Invalid(format!(
            "backoff_cap_ms ({}) must not be smaller than backoff_base_ms ({})",
            config.backoff_cap_ms, config.backoff_base_ms
        )));
    }
    if config.connect_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "connect_timeout_ms must be greater than 0".to_string(),
        ));
    }
    if config.supported_handshake_versions.is_empty() {
        return Err(ConfigError::Invalid(
            "supported_handshake_versions must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_endpoint_url(endpoint: &str) -> Result<(), ConfigError> {
    validate_endpoint(endpoint)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("endpoint_url '{endpoint}': {e}")))
}
