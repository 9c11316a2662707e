//! Ordered publish/subscribe used for lifecycle notification.
//!
//! Listeners are invoked in registration order, `on` returns an unsubscribe
//! handle, and unsubscription is idempotent — all three are part of the
//! observable contract relied on by the executor, orchestrator and recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`EventBus::on`], used to remove the listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered list of event listeners.
pub struct EventBus<E> {
    listeners: Mutex<Vec<(u64, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener, returning a handle for [`EventBus::off`]
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .expect("listener list poisoned")
            .push((id, Arc::new(listener)));
        Subscription { id }
    }

    /// Remove a listener. Removing an already-removed handle is a no-op.
    pub fn off(&self, subscription: Subscription) {
        self.listeners
            .lock()
            .expect("listener list poisoned")
            .retain(|(id, _)| *id != subscription.id);
    }

    /// Emit an event to all listeners in registration order.
    ///
    /// The listener list is snapshotted before invocation so a listener may
    /// subscribe or unsubscribe without deadlocking the bus.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .expect("listener list poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().expect("listener list poisoned").len()
    }

    /// Whether no listeners are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
