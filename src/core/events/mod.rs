//! Event dispatch.
//!
//! The state machine publishes [`SessionEvent`]s on an [`EventBus`]; external
//! collaborators (renderers, audit logs, metrics) subscribe without the
//! machine knowing about them.

mod bus;
mod types;

pub use bus::{EventBus, EventHandler, HandlerFailure, PublishReport, SubscriptionToken};
pub use types::{EventKind, Party, SessionEvent};
