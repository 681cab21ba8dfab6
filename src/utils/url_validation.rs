//! Endpoint URL validation
//!
//! Session endpoints must be WebSocket URLs (`ws://` or `wss://`) with a host.
//! Validation happens before any connection attempt so a typo surfaces as a
//! configuration error instead of a reconnect loop.

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during endpoint validation
#[derive(Debug, Error)]
pub enum EndpointValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be ws or wss, got: {0}")]
    UnsupportedScheme(String),
}

/// Validate a session endpoint and return the parsed URL.
///
/// # Example
/// ```
/// use waav_session::utils::validate_endpoint;
///
/// let url = validate_endpoint("wss://voice.example.com/v1/session").unwrap();
/// assert_eq!(url.host_str(), Some("voice.example.com"));
/// assert!(validate_endpoint("https://voice.example.com").is_err());
/// ```
pub fn validate_endpoint(endpoint: &str) -> Result<Url, EndpointValidationError> {
    let url = Url::parse(endpoint)?;

    // ws and wss are special schemes: the parser already rejects an empty host.
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(EndpointValidationError::UnsupportedScheme(other.to_string())),
    }
}

/// Warn when credentials would travel over an unencrypted connection.
pub fn warn_if_insecure(url: &Url, has_credentials: bool) {
    if has_credentials && url.scheme() == "ws" {
        warn!(
            host = url.host_str().unwrap_or_default(),
            "Auth token will be sent over an unencrypted ws:// connection"
        );
    }
}
