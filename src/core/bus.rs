//! Publish/subscribe message bus
//!
//! The engine treats the bus as fire-and-forget: `emit` hands the event
//! to every handler registered for its type, and a failing handler is
//! logged here rather than reported to the emitter. The only error an
//! emitter sees is a closed bus, and the lifecycle services log and count
//! that one instead of failing the write it follows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::core::error::BusError;

/// An event as delivered to handlers
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub emitted_at: DateTime<Utc>,
}

pub type HandlerResult = std::result::Result<(), String>;

type Handler = Arc<dyn Fn(&BusEvent) -> HandlerResult + Send + Sync>;

/// Message bus collaborator
pub trait MessageBus: Send + Sync {
    /// Deliver an event to all current subscribers of `event_type`
    fn emit(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Result<(), BusError>;
}

/// Subscribe to events of one type (`"*"` receives everything)
///
/// Dropping the returned [`Subscription`] keeps the handler registered;
/// call [`Subscription::unsubscribe`] to remove it.
pub trait Subscribe {
    fn on<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static;
}

/// Wildcard subscription key
pub const ALL_EVENTS: &str = "*";

#[derive(Default)]
struct Registry {
    handlers: RwLock<HashMap<String, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// In-process bus delivering synchronously on the emitting task
#[derive(Clone, Default)]
pub struct LocalBus {
    registry: Arc<Registry>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting events; later `emit` calls fail with `Closed`
    pub fn close(&self) {
        self.registry.closed.store(true, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.registry
            .handlers
            .read()
            .get(event_type)
            .map_or(0, |v| v.len())
    }
}

impl Subscribe for LocalBus {
    fn on<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event_type: event_type.to_string(),
            id,
        }
    }
}

impl MessageBus for LocalBus {
    fn emit(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Result<(), BusError> {
        if self.registry.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let event = BusEvent {
            event_type: event_type.to_string(),
            payload,
            source: source.to_string(),
            emitted_at: Utc::now(),
        };

        // Snapshot handlers so a handler may (un)subscribe without deadlocking
        let handlers: Vec<Handler> = {
            let map = self.registry.handlers.read();
            map.get(event_type)
                .into_iter()
                .chain(map.get(ALL_EVENTS))
                .flat_map(|v| v.iter().map(|(_, h)| Arc::clone(h)))
                .collect()
        };

        tracing::debug!(
            event_type,
            source,
            subscribers = handlers.len(),
            "Emitting event"
        );

        for handler in handlers {
            if let Err(reason) = handler(&event) {
                tracing::warn!(event_type, source, %reason, "Event handler failed");
            }
        }

        Ok(())
    }
}

/// Handle returned by [`Subscribe::on`]
pub struct Subscription {
    registry: Weak<Registry>,
    event_type: String,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut map = registry.handlers.write();
        if let Some(list) = map.get_mut(&self.event_type) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                map.remove(&self.event_type);
            }
        }
    }
}

/// Encode and emit a serializable payload
pub fn emit_json<T: Serialize>(
    bus: &dyn MessageBus,
    event_type: &str,
    payload: &T,
    source: &str,
) -> Result<(), BusError> {
    let value = serde_json::to_value(payload).map_err(|e| BusError::Encode(e.to_string()))?;
    bus.emit(event_type, value, source)
}
