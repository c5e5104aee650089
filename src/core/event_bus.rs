//! Pub/Sub event bus between the engine and whoever drives it.
//!
//! - `subscribe` registers a callback per event type, invoked synchronously on emit
//! - `emit` runs the callbacks, then queues the event for `poll`
//! - `poll` hands queued events to a main loop in batch
//!
//! Callback order is FIFO within an event type.

use log::warn;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Events beyond this are evicted oldest-first
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Blanket-implemented for every `Send + Sync + 'static` type.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

pub type BoxedEvent = Box<dyn Event>;

#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, Vec<Callback>>>>,
    queue: Arc<Mutex<Vec<BoxedEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register `callback` for events of type `E`.
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    /// Invoke subscribers of `E`, then queue the event.
    pub fn emit<E: Event + Clone>(&self, event: E) {
        // clone the callback list so a callback may subscribe or emit
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default();
        for cb in &callbacks {
            cb(&event);
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!(
                "EventBus queue full ({} events), evicting oldest {}",
                queue.len(),
                evict_count
            );
            queue.drain(0..evict_count);
        }
        queue.push(Box::new(event));
    }

    /// Take every queued event.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn unsubscribe_all<E: Event>(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|v| !v.is_empty())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Downcast a polled event.
///
/// Derefs to `dyn Event` first: calling `as_any` on the `Box` itself would
/// hit the blanket impl for `Box<dyn Event>` and never match.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
