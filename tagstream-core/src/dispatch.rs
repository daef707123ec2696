//! Per-provider event fan-out.
//!
//! Each provider instance owns one dispatcher; consumers receive it by
//! `Arc`, never through a global. Listeners for a kind run in registration
//! order. A panicking listener is caught and logged, and the remaining
//! listeners still run; the session task calling `emit` never unwinds.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use crate::event::{Event, EventKind};

/// Handle returned by [`EventDispatcher::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

/// Listener registry with ordered, panic-isolated dispatch.
#[derive(Default)]
pub struct EventDispatcher {
    registry: Mutex<Registry>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind. The same closure may be
    /// registered multiple times; every registration gets a distinct id.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> ListenerId {
        self.on_boxed(kind, Box::new(listener))
    }

    /// Object-safe variant of [`on`](Self::on) for trait-object callers.
    pub fn on_boxed(
        &self,
        kind: EventKind,
        listener: Box<dyn Fn(&Event) + Send + Sync + 'static>,
    ) -> ListenerId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::from(listener)));
        id
    }

    /// Unregister a listener. Returns `false` when the id is not (or no
    /// longer) registered under `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut registry = self.lock();
        match registry.listeners.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(lid, _)| *lid != id);
                list.len() != before
            }
            None => false,
        }
    }

    /// Deliver an event to every listener registered for its kind.
    ///
    /// The listener list is snapshotted before invocation, so a listener
    /// may call `on`/`off` re-entrantly; mutations apply from the next
    /// emit onwards.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = {
            let registry = self.lock();
            registry
                .listeners
                .get(&kind)
                .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(%kind, "event listener panicked");
            }
        }
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // Listeners run outside the lock, so a panicking listener cannot
        // poison it.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        let total: usize = registry.listeners.values().map(Vec::len).sum();
        f.debug_struct("EventDispatcher")
            .field("listeners", &total)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.on(EventKind::Connected, move |_| {
                order.lock().unwrap().push(tag);
            });
        }

        dispatcher.emit(&Event::Connected);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.on(EventKind::Connected, |_| panic!("boom"));
        let counter = Arc::clone(&calls);
        dispatcher.on(EventKind::Connected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(&Event::Connected);
        dispatcher.emit(&Event::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn off_unregisters_exactly_one_listener() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let keep = Arc::clone(&calls);
        dispatcher.on(EventKind::Connected, move |_| {
            keep.fetch_add(1, Ordering::SeqCst);
        });
        let drop_me = Arc::clone(&calls);
        let id = dispatcher.on(EventKind::Connected, move |_| {
            drop_me.fetch_add(100, Ordering::SeqCst);
        });

        assert!(dispatcher.off(EventKind::Connected, id));
        assert!(!dispatcher.off(EventKind::Connected, id));
        dispatcher.emit(&Event::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kinds_are_isolated() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        dispatcher.on(EventKind::Alarm, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(&Event::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(EventKind::Alarm), 1);
        assert_eq!(dispatcher.listener_count(EventKind::Connected), 0);
    }

    #[test]
    fn reentrant_off_from_a_listener_does_not_deadlock() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let id_slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let d = Arc::clone(&dispatcher);
        let slot = Arc::clone(&id_slot);
        let id = dispatcher.on(EventKind::Connected, move |_| {
            if let Some(id) = *slot.lock().unwrap() {
                d.off(EventKind::Connected, id);
            }
        });
        *id_slot.lock().unwrap() = Some(id);

        dispatcher.emit(&Event::Connected);
        assert_eq!(dispatcher.listener_count(EventKind::Connected), 0);
    }
}
