//! Frame encoder/decoder.
//!
//! # Frame Layout
//!
//! ```text
//! ┌────────┬──────────────────────────────────────┐
//! │ Tag    │ Payload                              │
//! │ 1 byte │ rest of the transport message        │
//! └────────┴──────────────────────────────────────┘
//! ```
//!
//! There is no length prefix: the transport delivers one discrete byte
//! sequence per frame, so the payload length is implied by the message size.
//!
//! | Tag | Meaning | Payload |
//! |------|---------|---------|
//! | 0x00 | Handshake | `[version, model]` |
//! | 0x01 | Audio | opaque bytes |
//! | 0x02 | Text | UTF-8 |
//! | 0x03 | Control | `[action]` |
//! | 0x04 | Metadata / QueueDrained | UTF-8 JSON, empty ⇒ QueueDrained |
//! | 0x05 | Error | UTF-8 (lossy) |
//! | 0x06 | Ping | empty |
//!
//! Both functions are pure; they never touch connection state.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::messages::{ControlAction, FrameTag, Message};
use crate::errors::ErrorKind;

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload does not match what its tag requires.
    #[error("Malformed {tag} frame: {reason}")]
    MalformedFrame { tag: String, reason: String },

    /// The leading tag byte is not part of the protocol.
    #[error("Unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    /// A control frame carried a byte outside the action table.
    #[error("Unknown control byte: 0x{0:02x}")]
    UnknownControlByte(u8),
}

impl CodecError {
    fn malformed(tag: impl ToString, reason: impl Into<String>) -> Self {
        CodecError::MalformedFrame {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }

    /// Error taxonomy bucket for this failure.
    ///
    /// An out-of-range control byte means the peer speaks a different protocol,
    /// so it is a protocol error rather than a per-frame one.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::MalformedFrame { .. } | CodecError::UnknownFrameType(_) => {
                ErrorKind::MalformedFrame
            }
            CodecError::UnknownControlByte(_) => ErrorKind::Protocol,
        }
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encode a message into a single frame.
pub fn encode(message: &Message) -> Bytes {
    let tag = message.tag().as_u8();
    match message {
        Message::Handshake { version, model } => Bytes::from(vec![tag, *version, *model]),
        Message::Audio(data) => with_payload(tag, data),
        Message::Text(text) => with_payload(tag, text.as_bytes()),
        Message::Control(action) => Bytes::from(vec![tag, action.as_u8()]),
        Message::Metadata(value) => with_payload(tag, value.to_string().as_bytes()),
        Message::Error(text) => with_payload(tag, text.as_bytes()),
        Message::Ping | Message::QueueDrained => Bytes::from(vec![tag]),
    }
}

fn with_payload(tag: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(tag);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a single frame.
///
/// Audio payloads are sliced out of `frame` without copying.
pub fn decode(frame: &Bytes) -> CodecResult<Message> {
    let Some(&tag_byte) = frame.first() else {
        return Err(CodecError::malformed("empty", "frame has no tag byte"));
    };
    let tag = FrameTag::from_u8(tag_byte).ok_or(CodecError::UnknownFrameType(tag_byte))?;
    let payload = &frame[1..];

    match tag {
        FrameTag::Handshake => {
            // Short handshakes fall back to version/model 0 instead of failing.
            let version = payload.first().copied().unwrap_or(0);
            let model = payload.get(1).copied().unwrap_or(0);
            Ok(Message::Handshake { version, model })
        }
        FrameTag::Audio => Ok(Message::Audio(frame.slice(1..))),
        FrameTag::Text => std::str::from_utf8(payload)
            .map(|text| Message::Text(text.to_string()))
            .map_err(|e| CodecError::malformed(tag, format!("invalid UTF-8: {e}"))),
        FrameTag::Control => {
            if payload.len() != 1 {
                return Err(CodecError::malformed(
                    tag,
                    format!("expected 1 payload byte, got {}", payload.len()),
                ));
            }
            ControlAction::from_u8(payload[0])
                .map(Message::Control)
                .ok_or(CodecError::UnknownControlByte(payload[0]))
        }
        FrameTag::Metadata => {
            // Length is checked before any parsing: an empty payload is the
            // queue-drained signal, never empty metadata.
            if payload.is_empty() {
                return Ok(Message::QueueDrained);
            }
            let text = std::str::from_utf8(payload)
                .map_err(|e| CodecError::malformed(tag, format!("invalid UTF-8: {e}")))?;
            serde_json::from_str(text)
                .map(Message::Metadata)
                .map_err(|e| CodecError::malformed(tag, format!("invalid JSON: {e}")))
        }
        FrameTag::Error => Ok(Message::Error(
            String::from_utf8_lossy(payload).into_owned(),
        )),
        FrameTag::Ping => Ok(Message::Ping),
    }
}

/// Decode a frame from a borrowed slice.
pub fn decode_slice(frame: &[u8]) -> CodecResult<Message> {
    decode(&Bytes::copy_from_slice(frame))
}
