//! Synchronous publish/subscribe bus for session events.
//!
//! Handlers run on the publishing task, in registration order. A handler that
//! returns an error or panics is logged and skipped; delivery continues with
//! the next handler.

use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{EventKind, SessionEvent};

/// Handler invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Returned by `subscribe`; pass to `unsubscribe` to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscriber {
    token: SubscriptionToken,
    /// `None` subscribes to every kind.
    kind: Option<EventKind>,
    handler: EventHandler,
}

/// One handler that failed during a publish.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub token: SubscriptionToken,
    pub message: String,
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Event fan-out.
///
/// Constructed explicitly and shared by `Arc`, so every session (and every
/// test) can own an isolated bus.
pub struct EventBus {
    next_token: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
    publish_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
            publish_count: AtomicU64::new(0),
        }
    }

    /// Subscribe to one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionToken
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<EventKind>, handler: EventHandler) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            token,
            kind,
            handler,
        });
        token
    }

    /// Remove a handler. Returns false if the token was unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.token != token);
        subscribers.len() != before
    }

    /// Deliver `event` to every matching handler.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while being called.
    pub fn publish(&self, event: &SessionEvent) -> PublishReport {
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();

        let targets: Vec<(SubscriptionToken, EventHandler)> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .map(|s| (s.token, s.handler.clone()))
            .collect();

        let mut report = PublishReport::default();
        for (token, handler) in targets {
            let message = match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            tracing::warn!(event = %kind, ?token, error = %message, "event handler failed");
            report.failures.push(HandlerFailure { token, message });
        }

        tracing::trace!(event = %kind, delivered = report.delivered, "published event");
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total number of events published.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
