//! Events published by the session.

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

use crate::core::protocol::ControlAction;
use crate::core::session::{SessionState, Speaker};
use crate::errors::{CloseReason, ErrorKind};

/// Which side of the connection caused something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    Local,
    Remote,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Local => write!(f, "local"),
            Party::Remote => write!(f, "remote"),
        }
    }
}

/// A session-level event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged { from: SessionState, to: SessionState },
    /// The handshake completed and the session is active.
    SessionReady { version: u8, model: u8 },
    /// The session reached the closed state.
    SessionClosed { reason: CloseReason },
    /// Something went wrong. Never thrown, always published.
    SessionError { kind: ErrorKind, message: String },
    /// A speaker took the turn.
    TurnStarted { speaker: Speaker },
    /// The current turn ended. `speaker` held the turn, `by` ended it.
    TurnEnded { speaker: Speaker, by: Party },
    /// Inbound audio from the peer.
    AudioReceived { data: Bytes },
    /// Inbound text.
    Transcript { text: String },
    /// Inbound metadata.
    Metadata { value: serde_json::Value },
    /// The peer sent a control code.
    ControlReceived { action: ControlAction },
    /// The peer consumed all queued outbound audio.
    QueueDrained,
    /// A reconnect attempt was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// The keepalive sent a ping.
    PingSent,
}

/// Subscription key for [`SessionEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    SessionReady,
    SessionClosed,
    SessionError,
    TurnStarted,
    TurnEnded,
    AudioReceived,
    Transcript,
    Metadata,
    ControlReceived,
    QueueDrained,
    Reconnecting,
    PingSent,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::StateChanged,
        EventKind::SessionReady,
        EventKind::SessionClosed,
        EventKind::SessionError,
        EventKind::TurnStarted,
        EventKind::TurnEnded,
        EventKind::AudioReceived,
        EventKind::Transcript,
        EventKind::Metadata,
        EventKind::ControlReceived,
        EventKind::QueueDrained,
        EventKind::Reconnecting,
        EventKind::PingSent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateChanged => "state_changed",
            EventKind::SessionReady => "session_ready",
            EventKind::SessionClosed => "session_closed",
            EventKind::SessionError => "session_error",
            EventKind::TurnStarted => "turn_started",
            EventKind::TurnEnded => "turn_ended",
            EventKind::AudioReceived => "audio_received",
            EventKind::Transcript => "transcript",
            EventKind::Metadata => "metadata",
            EventKind::ControlReceived => "control_received",
            EventKind::QueueDrained => "queue_drained",
            EventKind::Reconnecting => "reconnecting",
            EventKind::PingSent => "ping_sent",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::StateChanged { .. } => EventKind::StateChanged,
            SessionEvent::SessionReady { .. } => EventKind::SessionReady,
            SessionEvent::SessionClosed { .. } => EventKind::SessionClosed,
            SessionEvent::SessionError { .. } => EventKind::SessionError,
            SessionEvent::TurnStarted { .. } => EventKind::TurnStarted,
            SessionEvent::TurnEnded { .. } => EventKind::TurnEnded,
            SessionEvent::AudioReceived { .. } => EventKind::AudioReceived,
            SessionEvent::Transcript { .. } => EventKind::Transcript,
            SessionEvent::Metadata { .. } => EventKind::Metadata,
            SessionEvent::ControlReceived { .. } => EventKind::ControlReceived,
            SessionEvent::QueueDrained => EventKind::QueueDrained,
            SessionEvent::Reconnecting { .. } => EventKind::Reconnecting,
            SessionEvent::PingSent => EventKind::PingSent,
        }
    }
}
