//! Observer registry for telemetry and connection-state consumers
//!
//! Handlers are called synchronously on the delivering task, outside any
//! lock, so a handler may register or unsubscribe other handlers.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// Set of handlers for one event type
pub struct Observers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as the only handler, dropping any previous ones
    pub fn replace<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.handlers.clear();
        self.insert(&mut registry, Arc::new(handler))
    }

    /// Register `handler` alongside the existing ones
    pub fn add<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        self.insert(&mut registry, Arc::new(handler))
    }

    /// Deliver `value` to every registered handler in registration order
    pub fn notify(&self, value: &T) {
        let handlers: Vec<Handler<T>> = self
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, registry: &mut Registry<T>, handler: Handler<T>) -> Subscription {
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, handler));

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
                    registry.handlers.retain(|(handler_id, _)| *handler_id != id);
                }
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to one registered handler
///
/// Dropping the handle leaves the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler this subscription was issued for
    ///
    /// Has no effect if the handler was already replaced.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
