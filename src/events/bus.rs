//! Single-owner publish/subscribe registry.
//!
//! An [`EventBus`] maps event names to ordered listener lists. Listeners are
//! plain Rust closures returning `anyhow::Result<()>`; a failing listener is
//! logged and the emission carries on with the next one.
//!
//! # Design Principle: "Subscribe once. React always."
//!
//! Listeners are invoked synchronously, in registration order, on the thread
//! that calls [`EventBus::emit`]. They should be fast; expensive work belongs
//! on a timer or a spawned task.
//!
//! # Re-entrancy
//!
//! The listener list is snapshotted under the borrow, then the borrow is
//! released before any listener runs. Listeners may therefore call `on`,
//! `off` or `emit` on the same bus. Registrations removed earlier in an
//! emission are skipped; registrations added during an emission wait for the
//! next one.
//!
//! # Usage
//!
//! ```
//! use vws::events::EventBus;
//!
//! let bus: EventBus<String> = EventBus::new();
//! let id = bus.on("greeting", |name| {
//!     log::info!("hello {name}");
//!     Ok(())
//! });
//! assert!(id.is_some());
//! assert!(bus.emit("greeting", &"world".to_string()));
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use crate::collections::OrderedMap;
use crate::constants::DEFAULT_MAX_LISTENERS;

/// Shared listener closure stored by an [`EventBus`].
pub type Listener<T> = Rc<dyn Fn(&T) -> Result<()>>;

/// Unique identifier for a listener registration.
///
/// Ids are unique across every bus in the process, so an id can never
/// accidentally match a registration on another scope's bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt_{}", self.0)
    }
}

/// One listener registration.
struct Registration<T> {
    id: ListenerId,
    /// Removed before its first invocation.
    once: bool,
    listener: Listener<T>,
}

impl<T> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            listener: Rc::clone(&self.listener),
        }
    }
}

/// Named-event registry with one-shot listeners and a per-event cap.
pub struct EventBus<T> {
    /// Event name -> registrations in registration order.
    events: RefCell<OrderedMap<Vec<Registration<T>>>>,
    /// Per-event listener cap; `0` means [`DEFAULT_MAX_LISTENERS`].
    max_listeners: Cell<usize>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            events: RefCell::new(OrderedMap::new()),
            max_listeners: Cell::new(0),
        }
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events = self.events.borrow();
        f.debug_struct("EventBus")
            .field("event_count", &events.count())
            .field(
                "total_listeners",
                &events.values().iter().map(|r| r.len()).sum::<usize>(),
            )
            .field("max_listeners", &self.max_listeners())
            .finish()
    }
}

impl<T> EventBus<T> {
    /// Create an empty bus using the default listener cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bus with a specific per-event listener cap.
    #[must_use]
    pub fn with_max_listeners(limit: usize) -> Self {
        let bus = Self::default();
        bus.set_max_listeners(limit);
        bus
    }

    /// Current per-event listener cap.
    #[must_use]
    pub fn max_listeners(&self) -> usize {
        match self.max_listeners.get() {
            0 => DEFAULT_MAX_LISTENERS,
            limit => limit,
        }
    }

    /// Change the per-event listener cap. `0` restores the default.
    ///
    /// Existing registrations above a lowered cap are kept; the cap only
    /// gates new registrations.
    pub fn set_max_listeners(&self, limit: usize) -> &Self {
        self.max_listeners.set(limit);
        self
    }

    /// Register `listener` for `event`.
    ///
    /// Returns `None` (and logs a warning) when the event already holds the
    /// maximum number of listeners.
    pub fn on<F>(&self, event: &str, listener: F) -> Option<ListenerId>
    where
        F: Fn(&T) -> Result<()> + 'static,
    {
        self.register(event, Rc::new(listener), false)
    }

    /// Register `listener` for a single invocation of `event`.
    pub fn once<F>(&self, event: &str, listener: F) -> Option<ListenerId>
    where
        F: Fn(&T) -> Result<()> + 'static,
    {
        self.register(event, Rc::new(listener), true)
    }

    /// Remove listeners.
    ///
    /// `events` empty means every event. With `Some(listener)` only that
    /// registration is removed; with `None` every listener of the selected
    /// events is dropped.
    pub fn off(&self, events: &[&str], listener: Option<ListenerId>) {
        match listener {
            Some(id) if events.is_empty() => {
                for event in self.event_names() {
                    self.remove_listener(&event, id);
                }
            }
            Some(id) => {
                for event in events {
                    self.remove_listener(event, id);
                }
            }
            None => self.remove_all_listeners(events),
        }
    }

    /// Remove one registration. Returns `true` if it was present.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut events = self.events.borrow_mut();
        let Some(registrations) = events.get_mut(event) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            events.remove(event);
        }
        removed
    }

    /// Drop every listener of `events`, or of all events when empty.
    pub fn remove_all_listeners(&self, events: &[&str]) {
        let mut registry = self.events.borrow_mut();
        if events.is_empty() {
            registry.clear();
        } else {
            for event in events {
                registry.remove(event);
            }
        }
    }

    /// Drop every listener of every event.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Invoke every listener of `event` with `payload`.
    ///
    /// Returns `true` if at least one listener was registered when the
    /// emission started.
    pub fn emit(&self, event: &str, payload: &T) -> bool {
        // Snapshot under the borrow, release it before calling out
        let snapshot: Vec<Registration<T>> = self
            .events
            .borrow()
            .get(event)
            .map(|r| r.to_vec())
            .unwrap_or_default();

        if snapshot.is_empty() {
            return false;
        }

        for registration in snapshot {
            let live = if registration.once {
                self.remove_listener(event, registration.id)
            } else {
                self.is_registered(event, registration.id)
            };
            if !live {
                continue;
            }

            if let Err(e) = (registration.listener)(payload) {
                log::warn!(
                    "Event listener {} for '{}' failed: {:#}",
                    registration.id,
                    event,
                    e
                );
            }
        }

        true
    }

    /// Number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.events.borrow().get(event).map_or(0, Vec::len)
    }

    /// Names of all events with at least one listener.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.events.borrow().keys()
    }

    /// Ids of the listeners registered for `event`, in invocation order.
    #[must_use]
    pub fn listeners(&self, event: &str) -> Vec<ListenerId> {
        self.events
            .borrow()
            .get(event)
            .map(|r| r.iter().map(|reg| reg.id).collect())
            .unwrap_or_default()
    }

    fn is_registered(&self, event: &str, id: ListenerId) -> bool {
        self.events
            .borrow()
            .get(event)
            .is_some_and(|r| r.iter().any(|reg| reg.id == id))
    }

    fn register(&self, event: &str, listener: Listener<T>, once: bool) -> Option<ListenerId> {
        let limit = self.max_listeners();
        let mut events = self.events.borrow_mut();

        if events.get(event).map_or(0, Vec::len) >= limit {
            log::warn!(
                "Maximum listeners ({}) reached for '{}', new listener not added",
                limit,
                event
            );
            return None;
        }

        let id = ListenerId::next();
        events
            .get_or_insert_with(event, Vec::new)
            .push(Registration { id, once, listener });

        log::debug!("Registered event listener '{}' for '{}'", id, event);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::RefCell;

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_event_bus_new() {
        let bus: EventBus<()> = EventBus::new();
        assert_eq!(bus.listener_count("test_event"), 0);
        assert!(bus.event_names().is_empty());
        assert_eq!(bus.max_listeners(), DEFAULT_MAX_LISTENERS);
    }

    #[test]
    fn test_on_registers_listener() {
        let bus: EventBus<()> = EventBus::new();
        let id = bus.on("test_event", |()| Ok(())).unwrap();

        assert!(id.to_string().starts_with("evt_"));
        assert_eq!(bus.listener_count("test_event"), 1);
        assert_eq!(bus.listeners("test_event"), vec![id]);
        assert_eq!(bus.event_names(), vec!["test_event".to_string()]);
    }

    #[test]
    fn test_emit_invokes_in_registration_order() {
        let bus: EventBus<String> = EventBus::new();
        let seen = recorder();

        for tag in ["first", "second", "third"] {
            let seen = Rc::clone(&seen);
            bus.on("test_event", move |arg| {
                seen.borrow_mut().push(format!("{tag}:{arg}"));
                Ok(())
            });
        }

        assert!(bus.emit("test_event", &"x".to_string()));
        assert_eq!(
            *seen.borrow(),
            vec!["first:x", "second:x", "third:x"]
        );
    }

    #[test]
    fn test_emit_returns_false_without_listeners() {
        let bus: EventBus<u8> = EventBus::new();
        assert!(!bus.emit("nonexistent_event", &1));
    }

    #[test]
    fn test_emit_continues_on_listener_error() {
        let bus: EventBus<()> = EventBus::new();
        let second_called = Rc::new(Cell::new(false));

        bus.on("test_event", |()| Err(anyhow!("intentional error")));
        let flag = Rc::clone(&second_called);
        bus.on("test_event", move |()| {
            flag.set(true);
            Ok(())
        });

        assert!(bus.emit("test_event", &()));
        assert!(second_called.get());
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let bus: EventBus<()> = EventBus::new();
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        bus.once("test_event", move |()| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        assert!(bus.emit("test_event", &()));
        assert!(!bus.emit("test_event", &()));
        assert_eq!(calls.get(), 1);
        assert_eq!(bus.listener_count("test_event"), 0);
    }

    #[test]
    fn test_once_survives_reentrant_emit() {
        let bus: Rc<EventBus<()>> = Rc::new(EventBus::new());
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        let weak = Rc::downgrade(&bus);
        bus.once("test_event", move |()| {
            counter.set(counter.get() + 1);
            if let Some(bus) = weak.upgrade() {
                bus.emit("test_event", &());
            }
            Ok(())
        });

        bus.emit("test_event", &());
        bus.emit("test_event", &());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_listener_added_during_emit_waits_for_next_emit() {
        let bus: Rc<EventBus<()>> = Rc::new(EventBus::new());
        let late_calls = Rc::new(Cell::new(0));

        let weak = Rc::downgrade(&bus);
        let counter = Rc::clone(&late_calls);
        bus.once("test_event", move |()| {
            let counter = Rc::clone(&counter);
            if let Some(bus) = weak.upgrade() {
                bus.on("test_event", move |()| {
                    counter.set(counter.get() + 1);
                    Ok(())
                });
            }
            Ok(())
        });

        bus.emit("test_event", &());
        assert_eq!(late_calls.get(), 0);
        bus.emit("test_event", &());
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn test_listener_removed_during_emit_is_skipped() {
        let bus: Rc<EventBus<()>> = Rc::new(EventBus::new());
        let second_called = Rc::new(Cell::new(false));

        let weak = Rc::downgrade(&bus);
        bus.on("test_event", move |()| {
            if let Some(bus) = weak.upgrade() {
                bus.off(&["test_event"], None);
            }
            Ok(())
        });
        let flag = Rc::clone(&second_called);
        bus.on("test_event", move |()| {
            flag.set(true);
            Ok(())
        });

        assert!(bus.emit("test_event", &()));
        assert!(!second_called.get());
    }

    #[test]
    fn test_max_listeners_caps_registrations() {
        let bus: EventBus<()> = EventBus::with_max_listeners(3);

        for _ in 0..3 {
            assert!(bus.on("test_event", |()| Ok(())).is_some());
        }
        assert!(bus.on("test_event", |()| Ok(())).is_none());
        assert!(bus.once("test_event", |()| Ok(())).is_none());
        assert_eq!(bus.listener_count("test_event"), 3);

        // Other events have their own budget
        assert!(bus.on("other_event", |()| Ok(())).is_some());
    }

    #[test]
    fn test_default_cap_is_ten() {
        let bus: EventBus<()> = EventBus::new();
        for _ in 0..25 {
            let _ = bus.on("test_event", |()| Ok(()));
        }
        assert_eq!(bus.listener_count("test_event"), DEFAULT_MAX_LISTENERS);
    }

    #[test]
    fn test_set_max_listeners_zero_restores_default() {
        let bus: EventBus<()> = EventBus::with_max_listeners(2);
        assert_eq!(bus.max_listeners(), 2);
        bus.set_max_listeners(0);
        assert_eq!(bus.max_listeners(), DEFAULT_MAX_LISTENERS);
    }

    #[test]
    fn test_off_single_listener() {
        let bus: EventBus<()> = EventBus::new();
        let keep = bus.on("test_event", |()| Ok(())).unwrap();
        let drop_id = bus.on("test_event", |()| Ok(())).unwrap();

        bus.off(&["test_event"], Some(drop_id));
        assert_eq!(bus.listeners("test_event"), vec![keep]);
    }

    #[test]
    fn test_off_listener_without_names_searches_all_events() {
        let bus: EventBus<()> = EventBus::new();
        let id = bus.on("event_a", |()| Ok(())).unwrap();
        bus.on("event_b", |()| Ok(()));

        bus.off(&[], Some(id));
        assert_eq!(bus.listener_count("event_a"), 0);
        assert_eq!(bus.listener_count("event_b"), 1);
    }

    #[test]
    fn test_off_named_events_only() {
        let bus: EventBus<()> = EventBus::new();
        bus.on("event_a", |()| Ok(()));
        bus.on("event_a", |()| Ok(()));
        bus.on("event_b", |()| Ok(()));

        bus.off(&["event_a"], None);
        assert_eq!(bus.listener_count("event_a"), 0);
        assert_eq!(bus.listener_count("event_b"), 1);
        assert_eq!(bus.event_names(), vec!["event_b".to_string()]);
    }

    #[test]
    fn test_off_everything() {
        let bus: EventBus<()> = EventBus::new();
        bus.on("event_a", |()| Ok(()));
        bus.on("event_b", |()| Ok(()));

        bus.off(&[], None);
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn test_remove_listener_nonexistent() {
        let bus: EventBus<()> = EventBus::new();
        let id = bus.on("test_event", |()| Ok(())).unwrap();

        // Should not panic
        assert!(!bus.remove_listener("other_event", id));
        assert!(bus.remove_listener("test_event", id));
        assert!(!bus.remove_listener("test_event", id));
    }
}
