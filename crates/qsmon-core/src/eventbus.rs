//! Topic-keyed publish/subscribe bus.
//!
//! Features talk to each other only through the [`EventManager`]: a command
//! result processor emits an [`Event`], and every handler registered for the
//! event's topic is invoked in registration order.
//!
//! Registration and emission may happen from any thread. Handler tables are
//! guarded by locks, and emission iterates over a snapshot taken under the
//! lock, so handlers are free to (un)register other handlers while running.
//! A failing or panicking handler is logged and never affects the others.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use crate::event::Event;
use crate::schema::{EventSchema, TopicSchema};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Error returned by an event handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventError {
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("unexpected payload for topic '{topic}': {reason}")]
    Payload { topic: String, reason: String },
}

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), EventError> + Send + Sync>;

/// Callback run once the bus becomes ready.
pub type ReadyListener = Box<dyn FnOnce(&EventManager) + Send>;

/// Wrap a closure as an [`EventHandler`].
///
/// Keep the returned `Arc` around to unregister the handler later; identity
/// is pointer equality on it.
pub fn event_handler<F>(f: F) -> EventHandler
where
    F: Fn(&Event) -> Result<(), EventError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
struct ReadyState {
    ready: bool,
    pending: Vec<ReadyListener>,
}

/// Publish/subscribe bus with deferred-ready registration.
pub struct EventManager {
    id: u64,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    schema: RwLock<EventSchema>,
    ready: Mutex<ReadyState>,
}

impl EventManager {
    pub fn new() -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            handlers: RwLock::new(HashMap::new()),
            schema: RwLock::new(EventSchema::new()),
            ready: Mutex::new(ReadyState::default()),
        }
    }

    /// Process-unique id of this bus, used to key shared processors.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register `handler` for `topic`.
    ///
    /// Returns `false` if this exact handler is already registered for the
    /// topic; the duplicate is ignored.
    pub fn register_event_handler(&self, topic: &str, handler: EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(topic.to_string()).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            tracing::debug!(topic, "Handler already registered, ignoring");
            return false;
        }
        list.push(handler);
        tracing::debug!(topic, count = list.len(), "Registered event handler");
        true
    }

    /// Remove `handler` from `topic`. Returns whether it was registered.
    pub fn unregister_event_handler(&self, topic: &str, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(topic);
        }
        if removed {
            tracing::debug!(topic, "Unregistered event handler");
        }
        removed
    }

    /// Deliver `event` to every handler of its topic.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn emit(&self, event: Event) -> usize {
        let topic = event.topic().to_string();

        if let Event::Dynamic { payload, .. } = &event {
            for violation in self.schema.read().validate(&topic, payload) {
                tracing::warn!(topic = %topic, "Schema violation: {}", violation);
            }
        }

        let snapshot: Vec<EventHandler> = match self.handlers.read().get(&topic) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => {
                tracing::debug!(topic = %topic, "No handlers registered for event");
                return 0;
            }
        };

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!(topic = %topic, error = %e, "Event handler failed");
                }
                Err(_) => {
                    tracing::error!(topic = %topic, "Event handler panicked");
                }
            }
        }
        delivered
    }

    /// Emit a dynamic event built from `topic` and `payload`.
    pub fn emit_event(&self, topic: &str, payload: Map<String, Value>) -> usize {
        self.emit(Event::dynamic(topic, payload))
    }

    /// Topics that currently have at least one handler.
    pub fn get_registered_events(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn get_handler_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map(Vec::len).unwrap_or(0)
    }

    pub fn clear_event_handlers(&self, topic: &str) {
        self.handlers.write().remove(topic);
    }

    pub fn clear_all_handlers(&self) {
        self.handlers.write().clear();
    }

    /// Declare the expected payload shape of a dynamic topic.
    pub fn declare_schema(&self, topic: &str, schema: TopicSchema) {
        self.schema.write().declare(topic, schema);
    }

    /// Run `listener` once the bus is ready.
    ///
    /// If the bus is already ready the listener runs immediately on the
    /// calling thread.
    pub fn add_ready_listener<F>(&self, listener: F)
    where
        F: FnOnce(&EventManager) + Send + 'static,
    {
        {
            let mut state = self.ready.lock();
            if !state.ready {
                state.pending.push(Box::new(listener));
                return;
            }
        }
        listener(self);
    }

    /// Mark the bus ready and run every queued listener exactly once.
    ///
    /// Subsequent calls are no-ops.
    pub fn set_ready(&self) {
        let pending = {
            let mut state = self.ready.lock();
            if state.ready {
                return;
            }
            state.ready = true;
            std::mem::take(&mut state.pending)
        };

        tracing::debug!(listeners = pending.len(), "Event manager ready");
        for listener in pending {
            if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
                tracing::error!("Ready listener panicked");
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.lock().ready
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("id", &self.id)
            .field("topics", &self.get_registered_events())
            .field("ready", &self.is_ready())
            .finish()
    }
}
