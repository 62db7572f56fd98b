//! Named-topic event dispatch.
//!
//! The runtime keeps three kinds of dispatchers: one on the entity store for
//! lifecycle topics, one per query for membership and change topics, and one
//! on the world for application-defined cross-system signals. All of them are
//! instances of [`EventDispatcher`].
//!
//! Handlers are fallible. A handler that returns `Err` is logged via
//! `tracing` and dispatch continues with the remaining handlers; the
//! `handled` counter still records the invocation.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::warn;

use crate::component::ComponentTypeId;
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// Payload and handler types
// ---------------------------------------------------------------------------

/// Data carried by an emitted event.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// An entity lifecycle or membership event.
    Entity(EntityId),
    /// A component-level event on an entity.
    Component {
        entity: EntityId,
        component: ComponentTypeId,
    },
    /// An application-defined payload on the world bus.
    Message(serde_json::Value),
}

/// Error type a handler may surface. Failures are logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error>;

/// A subscribed callback. Identity (for `unsubscribe`/`has` and duplicate
/// detection) is the `Rc` allocation, so callers keep a clone of the handle
/// they subscribed with.
pub type Handler = Rc<dyn Fn(&EventPayload) -> Result<(), HandlerError>>;

// ---------------------------------------------------------------------------
// EventDispatcher
// ---------------------------------------------------------------------------

/// Multi-listener dispatcher over string-named topics.
///
/// Duplicate subscriptions of the same handler are ignored. `emit` walks a
/// snapshot of the handler list taken before the first invocation, so the
/// set of handlers for an emission is fixed at emit time.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Vec<Handler>>,
    fired: u64,
    handled: u64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`. A handler already subscribed to the
    /// topic is not added twice.
    pub fn subscribe(&mut self, topic: &str, handler: Handler) {
        let list = self.handlers.entry(topic.to_owned()).or_default();
        if list.iter().any(|h| Rc::ptr_eq(h, &handler)) {
            return;
        }
        list.push(handler);
    }

    /// Remove `handler` from `topic`. Returns whether it was subscribed.
    pub fn unsubscribe(&mut self, topic: &str, handler: &Handler) -> bool {
        let Some(list) = self.handlers.get_mut(topic) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| Rc::ptr_eq(h, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.handlers.remove(topic);
        }
        true
    }

    /// Whether `handler` is currently subscribed to `topic`.
    pub fn has(&self, topic: &str, handler: &Handler) -> bool {
        self.handlers
            .get(topic)
            .is_some_and(|list| list.iter().any(|h| Rc::ptr_eq(h, handler)))
    }

    /// Emit `payload` to every handler subscribed to `topic`.
    pub fn emit(&mut self, topic: &str, payload: &EventPayload) {
        self.fired += 1;
        let Some(snapshot) = self.handlers.get(topic).cloned() else {
            return;
        };
        for handler in snapshot {
            self.handled += 1;
            if let Err(error) = handler(payload) {
                warn!(topic, %error, "event handler failed");
            }
        }
    }

    /// Number of `emit` calls so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Number of handler invocations so far (failed ones included).
    pub fn handled(&self) -> u64 {
        self.handled
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("topics", &self.handlers.len())
            .field("fired", &self.fired)
            .field("handled", &self.handled)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
