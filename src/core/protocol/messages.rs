//! Wire message types for the session protocol.
//!
//! Every frame carries exactly one [`Message`]; the variant is identified by
//! the leading tag byte on the wire (see [`FrameTag`]).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Frame Tags
// =============================================================================

/// Leading tag byte of a frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameTag {
    Handshake = 0x00,
    Audio = 0x01,
    Text = 0x02,
    Control = 0x03,
    /// Shared by `Metadata` (non-empty payload) and `QueueDrained` (empty payload).
    Metadata = 0x04,
    Error = 0x05,
    Ping = 0x06,
}

impl FrameTag {
    /// Map a raw tag byte to a known frame tag.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(FrameTag::Handshake),
            0x01 => Some(FrameTag::Audio),
            0x02 => Some(FrameTag::Text),
            0x03 => Some(FrameTag::Control),
            0x04 => Some(FrameTag::Metadata),
            0x05 => Some(FrameTag::Error),
            0x06 => Some(FrameTag::Ping),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameTag::Handshake => "handshake",
            FrameTag::Audio => "audio",
            FrameTag::Text => "text",
            FrameTag::Control => "control",
            FrameTag::Metadata => "metadata",
            FrameTag::Error => "error",
            FrameTag::Ping => "ping",
        };
        write!(f, "{name}(0x{:02x})", self.as_u8())
    }
}

// =============================================================================
// Control Actions
// =============================================================================

/// Turn-taking control codes carried by `Control` frames.
///
/// The set is closed: any other byte is rejected at decode time.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start = 0x00,
    EndTurn = 0x01,
    Pause = 0x02,
    Restart = 0x03,
}

impl ControlAction {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ControlAction::Start),
            0x01 => Some(ControlAction::EndTurn),
            0x02 => Some(ControlAction::Pause),
            0x03 => Some(ControlAction::Restart),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse an action name as used on the command line and in logs.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "start" => Some(ControlAction::Start),
            "end_turn" | "end-turn" | "endturn" => Some(ControlAction::EndTurn),
            "pause" => Some(ControlAction::Pause),
            "restart" => Some(ControlAction::Restart),
            _ => None,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAction::Start => write!(f, "start"),
            ControlAction::EndTurn => write!(f, "end_turn"),
            ControlAction::Pause => write!(f, "pause"),
            ControlAction::Restart => write!(f, "restart"),
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// A single logical protocol message.
///
/// Messages are plain values; none of them refer to connection state.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Version/model negotiation. Gates entry into the active state.
    Handshake { version: u8, model: u8 },
    /// Opaque audio payload. The codec is negotiated above the framing layer.
    Audio(Bytes),
    /// Incremental transcript or chat text.
    Text(String),
    /// Turn-taking control code.
    Control(ControlAction),
    /// Structured JSON metadata. Every JSON value serializes to a non-empty
    /// payload, so it never collides with [`Message::QueueDrained`].
    Metadata(serde_json::Value),
    /// Human-readable error text from the peer.
    Error(String),
    /// Keepalive probe.
    Ping,
    /// The peer has consumed all previously queued audio.
    QueueDrained,
}

impl Message {
    /// The tag byte this message is framed with.
    pub fn tag(&self) -> FrameTag {
        match self {
            Message::Handshake { .. } => FrameTag::Handshake,
            Message::Audio(_) => FrameTag::Audio,
            Message::Text(_) => FrameTag::Text,
            Message::Control(_) => FrameTag::Control,
            Message::Metadata(_) | Message::QueueDrained => FrameTag::Metadata,
            Message::Error(_) => FrameTag::Error,
            Message::Ping => FrameTag::Ping,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake { .. } => "handshake",
            Message::Audio(_) => "audio",
            Message::Text(_) => "text",
            Message::Control(_) => "control",
            Message::Metadata(_) => "metadata",
            Message::Error(_) => "error",
            Message::Ping => "ping",
            Message::QueueDrained => "queue_drained",
        }
    }
}
