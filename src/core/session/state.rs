//! Session state: the lifecycle enum and the per-session data it guards.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use tokio::time::Instant;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet opened.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected; waiting for the server handshake.
    HandshakePending,
    /// Handshake complete. Frames flow both ways.
    Active,
    /// Waiting to retry; the value is the attempt about to be made.
    Reconnecting(u32),
    /// Terminal until the next `open`.
    Closed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// True while a transport connection exists or is being established.
    pub fn is_connected_or_connecting(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::HandshakePending | SessionState::Active
        )
    }

    pub(crate) fn connection_status(&self) -> ConnectionStatus {
        match self {
            SessionState::Connecting => ConnectionStatus::Connecting,
            SessionState::HandshakePending | SessionState::Active => ConnectionStatus::Connected,
            SessionState::Idle | SessionState::Reconnecting(_) | SessionState::Closed => {
                ConnectionStatus::Disconnected
            }
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::HandshakePending => write!(f, "HandshakePending"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Reconnecting(attempt) => write!(f, "Reconnecting({attempt})"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Transport-level view of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// A party that can hold the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Agent,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Agent => write!(f, "agent"),
        }
    }
}

/// Who is currently speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Turn {
    #[default]
    Idle,
    UserSpeaking,
    AgentSpeaking,
}

impl Turn {
    pub fn speaking(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => Turn::UserSpeaking,
            Speaker::Agent => Turn::AgentSpeaking,
        }
    }

    /// The speaker holding the turn, if any.
    pub fn speaker(&self) -> Option<Speaker> {
        match self {
            Turn::Idle => None,
            Turn::UserSpeaking => Some(Speaker::User),
            Turn::AgentSpeaking => Some(Speaker::Agent),
        }
    }
}

/// Handshake values agreed with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NegotiatedHandshake {
    pub version: u8,
    pub model: u8,
}

/// Mutable per-session data. Owned and mutated only by the state machine.
#[derive(Debug, Default)]
pub struct Session {
    pub handshake: Option<NegotiatedHandshake>,
    pub current_turn: Turn,
    /// Audio sent but not yet released by a queue-drained signal.
    pub outbound_audio_queue: VecDeque<Bytes>,
    pub queue_drain_pending: bool,
    pub reconnect_attempt: u32,
    /// Set by `Pause`, cleared by `Start` and `Restart`.
    pub paused: bool,
    pub last_activity_at: Option<Instant>,
}

impl Session {
    pub fn handshake_complete(&self) -> bool {
        self.handshake.is_some()
    }

    /// Drop the outbound queue without waiting for the peer to drain it.
    pub fn clear_queue(&mut self) {
        self.outbound_audio_queue.clear();
        self.queue_drain_pending = false;
    }

    /// Forget everything tied to the current connection. The reconnect
    /// counter survives so the backoff keeps growing across attempts.
    pub fn reset_connection(&mut self) {
        let reconnect_attempt = self.reconnect_attempt;
        *self = Session {
            reconnect_attempt,
            ..Session::default()
        };
    }
}

/// Point-in-time view of a session, safe to hand to other tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub connection_status: ConnectionStatus,
    pub turn: Turn,
    pub queue_depth: usize,
    pub queue_drain_pending: bool,
    pub reconnect_attempt: u32,
    pub handshake: Option<NegotiatedHandshake>,
    pub paused: bool,
}
