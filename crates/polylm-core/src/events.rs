//! Typed publish/subscribe event bus.
//!
//! A small multi-subscriber callback registry, scoped to the engine
//! context that owns it — components receive a bus handle at
//! construction instead of reaching for process-global state. Cloning a
//! bus clones the handle, not the subscriber list.

use std::sync::{Arc, PoisonError, RwLock};

type Subscriber<E> = Box<dyn Fn(&E) + Send + Sync>;

/// A typed event bus.
///
/// `emit` delivers the event to every subscriber synchronously, in
/// subscription order. Subscribers must not block.
pub struct EventBus<E> {
    subscribers: Arc<RwLock<Vec<Subscriber<E>>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<E> EventBus<E> {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers a subscriber.
    pub fn subscribe(&self, f: impl Fn(&E) + Send + Sync + 'static) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(f));
    }

    /// Delivers `event` to all subscribers.
    pub fn emit(&self, event: &E) {
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for sub in subs.iter() {
            sub(event);
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the bus has no subscribers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
