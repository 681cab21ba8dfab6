use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::core::session::SessionState;

/// Errors returned by the session API.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The outbound audio queue is at capacity. Wait for a queue-drained
    /// signal or discard audio locally.
    #[error("Outbound audio queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The operation requires an active session.
    #[error("Session not active (state: {0})")]
    NotActive(SessionState),

    /// `open` was called on a session that is already open.
    #[error("Session already open (state: {0})")]
    AlreadyOpen(SessionState),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The session driver task is no longer running.
    #[error("Session driver stopped")]
    DriverStopped,
}

impl SessionError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::QueueFull { .. } => ErrorKind::Backpressure,
            SessionError::DriverStopped => ErrorKind::Transport,
            SessionError::NotActive(_)
            | SessionError::AlreadyOpen(_)
            | SessionError::InvalidConfiguration(_)
            | SessionError::InvalidEndpoint(_) => ErrorKind::Protocol,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Error taxonomy carried by `SessionError` bus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A single frame was discarded; the session continues.
    MalformedFrame,
    /// The peer violated the protocol; the session is torn down.
    Protocol,
    /// The connection failed or was lost.
    Transport,
    /// Expected flow-control signal, not a failure.
    Backpressure,
    /// The peer reported an error through an `Error` frame.
    Remote,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MalformedFrame => write!(f, "malformed_frame"),
            ErrorKind::Protocol => write!(f, "protocol"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Backpressure => write!(f, "backpressure"),
            ErrorKind::Remote => write!(f, "remote"),
        }
    }
}

/// Why a session reached the closed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseReason {
    /// The application called `close`.
    Requested,
    /// The server answered the handshake with a version we do not support.
    ProtocolVersionMismatch { version: u8 },
    /// The reconnect budget ran out.
    ReconnectExhausted { attempts: u32 },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "requested"),
            CloseReason::ProtocolVersionMismatch { version } => {
                write!(f, "protocol version mismatch (server version {version})")
            }
            CloseReason::ReconnectExhausted { attempts } => {
                write!(f, "reconnect exhausted after {attempts} attempts")
            }
        }
    }
}
