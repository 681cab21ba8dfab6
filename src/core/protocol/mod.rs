//! Binary wire protocol.
//!
//! One frame per transport message: a tag byte followed by the payload.
//! See [`codec`] for the exact layout.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, CodecResult, decode, decode_slice, encode};
pub use messages::{ControlAction, FrameTag, Message};
