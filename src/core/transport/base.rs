//! Base traits and types for byte-stream transports.
//!
//! A transport moves discrete byte frames between the session and the remote
//! endpoint. It knows nothing about the protocol carried inside the frames.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// =============================================================================
// Error Types
// =============================================================================

/// Failures surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// A frame could not be handed to the connection.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The remote endpoint closed the connection.
    #[error("Remote closed connection (code {code}): {reason}")]
    RemoteClosed { code: u16, reason: String },

    /// The underlying stream reported an error.
    #[error("Transport error: {0}")]
    Io(String),

    /// An operation did not finish in time.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// No inbound activity was observed within the liveness window.
    #[error("Connection stalled: no inbound activity for {0}ms")]
    Stalled(u64),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Events
// =============================================================================

/// Notifications delivered from a live connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound frame.
    Frame(Bytes),
    /// The remote side closed the connection.
    Closed { code: u16, reason: String },
    /// The connection failed.
    Error(String),
}

impl TransportEvent {
    /// The failure this event represents, if it ends the connection.
    pub fn into_failure(self) -> Option<TransportError> {
        match self {
            TransportEvent::Frame(_) => None,
            TransportEvent::Closed { code, reason } => {
                Some(TransportError::RemoteClosed { code, reason })
            }
            TransportEvent::Error(message) => Some(TransportError::Io(message)),
        }
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Opens connections to an endpoint.
///
/// Inbound frames and terminal notifications for the new connection are
/// pushed into `events`. The receiver side belongs to the session driver,
/// which processes them on its own task.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportResult<Box<dyn TransportHandle>>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// A live connection.
pub trait TransportHandle: Send {
    /// Queue one frame for sending. Never waits for the network.
    fn send(&mut self, frame: Bytes) -> TransportResult<()>;

    /// Close the connection. No further events are delivered afterwards.
    fn close(&mut self);
}

/// Shared transport trait object.
pub type SharedTransport = Arc<dyn Transport>;
