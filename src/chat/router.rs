//! Event subscriptions.
//!
//! Handlers are registered per [`EventKind`] and invoked synchronously, in
//! the caller's context, for every matching event. Dispatch never consumes a
//! subscription. Each kind holds a set: registering the same handler `Arc`
//! twice for the same kind is a no-op. Invocation order is unspecified.
//!
//! The handler table is snapshotted before invocation, so handlers may
//! subscribe further handlers without deadlocking; those take effect from the
//! next event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::event::{ChatEvent, EventKind};

/// Callback invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

/// Maps event kinds to their subscribed handlers.
#[derive(Default)]
pub struct EventRouter {
    handlers: Mutex<HashMap<EventKind, Vec<EventHandler>>>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.lock();
        f.debug_struct("EventRouter")
            .field("kinds", &handlers.len())
            .field("total_handlers", &handlers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<EventHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `handler` to `kind`.
    ///
    /// Returns `true` if the handler was newly added, `false` if this exact
    /// handler was already subscribed to `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> bool {
        let mut handlers = self.lock();
        let set = handlers.entry(kind).or_default();
        if set.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            return false;
        }
        set.push(handler);
        log::debug!("[EventRouter] Subscribed handler to {}", kind);
        true
    }

    /// Remove `handler` from `kind`. Returns `true` if it was subscribed.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) -> bool {
        let mut handlers = self.lock();
        let Some(set) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = set.len();
        set.retain(|existing| !Arc::ptr_eq(existing, handler));
        let removed = set.len() != before;
        if set.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Snapshot of the handlers currently subscribed to `kind`.
    pub fn handlers(&self, kind: EventKind) -> Vec<EventHandler> {
        self.lock().get(&kind).cloned().unwrap_or_default()
    }

    /// Number of handlers subscribed to `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler subscribed to `kind` with `event`.
    ///
    /// A panicking handler is not caught here. Returns the number of
    /// handlers invoked.
    pub fn dispatch(&self, kind: EventKind, event: &ChatEvent) -> usize {
        self.dispatch_with(kind, event, |handler, event| handler(event))
    }

    /// Like [`Self::dispatch`], with the call to each handler delegated to
    /// `invoke` (used by the connection to isolate handler failures).
    pub fn dispatch_with(
        &self,
        kind: EventKind,
        event: &ChatEvent,
        mut invoke: impl FnMut(&EventHandler, &ChatEvent),
    ) -> usize {
        let handlers = self.handlers(kind);
        for handler in &handlers {
            invoke(handler, event);
        }
        handlers.len()
    }

    /// Add every subscription of `other` to this router (set semantics).
    ///
    /// Returns the number of subscriptions newly added.
    pub fn merge_from(&self, other: &EventRouter) -> usize {
        // Snapshot first so the two locks are never held together.
        let incoming: Vec<(EventKind, Vec<EventHandler>)> = other
            .lock()
            .iter()
            .map(|(kind, set)| (*kind, set.clone()))
            .collect();

        incoming
            .into_iter()
            .flat_map(|(kind, set)| set.into_iter().map(move |handler| (kind, handler)))
            .filter(|(kind, handler)| self.subscribe(*kind, Arc::clone(handler)))
            .count()
    }
}
