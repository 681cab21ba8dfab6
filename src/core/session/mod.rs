//! Session layer: state machine, reconnect policy, keepalive, and the task
//! that drives them.
//!
//! Applications use [`VoiceSession`]. The [`SessionMachine`] underneath is
//! synchronous and I/O free, so it can also be driven directly.

mod backoff;
mod driver;
mod handle;
mod machine;
mod state;
mod watchdog;

pub use backoff::BackoffPolicy;
pub use handle::VoiceSession;
pub use machine::{Effect, SessionMachine, TimerKind};
pub use state::{
    ConnectionStatus, NegotiatedHandshake, Session, SessionSnapshot, SessionState, Speaker, Turn,
};
pub use watchdog::{Watchdog, WatchdogVerdict};
