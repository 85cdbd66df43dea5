//! Event emitter partitioned by subscriber scope.
//!
//! A [`ScopedEmitter`] keeps one [`EventBus`] per [`ScopeKey`]. Subscribers
//! register under their own scope, so clearing one scope never touches the
//! listeners of another, while [`ScopedEmitter::emit`] fans every event out to
//! all scopes.
//!
//! ```text
//!   ScopedEmitter
//!     ├── "vws_client_2"  → EventBus { on_open: [..], on_message: [..] }
//!     ├── "vws_channel_1" → EventBus { on_open: [once] }
//!     └── "_default"      → EventBus { .. }   (subscribers without identity)
//! ```
//!
//! # Scope identity
//!
//! Subscribers name their scope through the [`Scoped`] trait. A subscriber
//! that cannot supply one is bucketed under [`ScopeKey::fallback`], shared
//! with every other anonymous subscriber, and a warning is logged. Isolation
//! is degraded in that case, not lost silently.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use super::bus::{EventBus, ListenerId};
use crate::collections::OrderedMap;

/// Key of the bucket used by subscribers without an identity.
const FALLBACK_SCOPE: &str = "_default";

/// Prefix shared by every generated scope key.
const SCOPE_PREFIX: &str = "vws_";

/// Identity used to bucket event listeners.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Generate a process-unique key such as `vws_channel_3`.
    #[must_use]
    pub fn generate(kind: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self(format!("{SCOPE_PREFIX}{kind}_{n}"))
    }

    /// The shared key for subscribers without an identity.
    #[must_use]
    pub fn fallback() -> Self {
        Self(FALLBACK_SCOPE.to_string())
    }

    /// Whether this is the shared fallback key.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.0 == FALLBACK_SCOPE
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScopeKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A subscriber that can name the scope its listeners belong to.
pub trait Scoped {
    /// Stable identity of this subscriber, or `None` to use the shared
    /// fallback scope.
    fn scope_key(&self) -> Option<ScopeKey>;
}

impl Scoped for ScopeKey {
    fn scope_key(&self) -> Option<ScopeKey> {
        Some(self.clone())
    }
}

/// Anonymous subscriber; always lands in the fallback scope.
impl Scoped for () {
    fn scope_key(&self) -> Option<ScopeKey> {
        None
    }
}

/// Resolve the bucket for `scope`, falling back with a warning.
fn resolve<S: Scoped + ?Sized>(scope: &S) -> ScopeKey {
    scope.scope_key().unwrap_or_else(|| {
        log::warn!("Binding listener on the default scope '{FALLBACK_SCOPE}'");
        ScopeKey::fallback()
    })
}

/// Event emitter holding one [`EventBus`] per subscriber scope.
pub struct ScopedEmitter<T> {
    buses: RefCell<OrderedMap<Rc<EventBus<T>>>>,
    /// Cap handed to every bus created by this emitter; `0` means default.
    max_listeners: Cell<usize>,
}

impl<T> Default for ScopedEmitter<T> {
    fn default() -> Self {
        Self {
            buses: RefCell::new(OrderedMap::new()),
            max_listeners: Cell::new(0),
        }
    }
}

impl<T> std::fmt::Debug for ScopedEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedEmitter")
            .field("scopes", &self.buses.borrow().keys())
            .field("max_listeners", &self.max_listeners.get())
            .finish()
    }
}

impl<T> ScopedEmitter<T> {
    /// Create an emitter with no scopes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an emitter whose buses cap each event at `limit` listeners.
    #[must_use]
    pub fn with_max_listeners(limit: usize) -> Self {
        let emitter = Self::default();
        emitter.max_listeners.set(limit);
        emitter
    }

    /// Register `listener` for `event` under `scope`.
    pub fn on<S, F>(&self, scope: &S, event: &str, listener: F) -> Option<ListenerId>
    where
        S: Scoped + ?Sized,
        F: Fn(&T) -> Result<()> + 'static,
    {
        self.bus_for(&resolve(scope)).on(event, listener)
    }

    /// Register `listener` for one invocation of `event` under `scope`.
    pub fn once<S, F>(&self, scope: &S, event: &str, listener: F) -> Option<ListenerId>
    where
        S: Scoped + ?Sized,
        F: Fn(&T) -> Result<()> + 'static,
    {
        self.bus_for(&resolve(scope)).once(event, listener)
    }

    /// Clear `scope`'s listeners for `events` (every event when empty).
    ///
    /// Other scopes are never affected.
    pub fn off<S: Scoped + ?Sized>(&self, scope: &S, events: &[&str]) {
        if let Some(bus) = self.existing_bus(&resolve(scope)) {
            bus.off(events, None);
        }
    }

    /// Remove a single registration from `scope`.
    pub fn off_listener<S: Scoped + ?Sized>(&self, scope: &S, event: &str, id: ListenerId) -> bool {
        self.existing_bus(&resolve(scope))
            .is_some_and(|bus| bus.remove_listener(event, id))
    }

    /// Deliver `event` to every scope.
    ///
    /// Returns `true` if any scope had a listener for it.
    pub fn emit(&self, event: &str, payload: &T) -> bool {
        let buses: Vec<Rc<EventBus<T>>> = self
            .buses
            .borrow()
            .values()
            .into_iter()
            .map(Rc::clone)
            .collect();

        let mut delivered = false;
        for bus in buses {
            delivered |= bus.emit(event, payload);
        }
        delivered
    }

    /// Clear the listeners of every scope, keeping the scopes themselves.
    pub fn clear(&self) {
        let buses: Vec<Rc<EventBus<T>>> = self
            .buses
            .borrow()
            .values()
            .into_iter()
            .map(Rc::clone)
            .collect();
        for bus in buses {
            bus.clear();
        }
    }

    /// Listener count of `event` within `scope`.
    #[must_use]
    pub fn listener_count<S: Scoped + ?Sized>(&self, scope: &S, event: &str) -> usize {
        scope
            .scope_key()
            .or_else(|| Some(ScopeKey::fallback()))
            .and_then(|key| self.existing_bus(&key))
            .map_or(0, |bus| bus.listener_count(event))
    }

    /// Listener count of `event` summed across all scopes.
    #[must_use]
    pub fn total_listener_count(&self, event: &str) -> usize {
        self.buses
            .borrow()
            .values()
            .iter()
            .map(|bus| bus.listener_count(event))
            .sum()
    }

    /// Keys of every scope that has ever registered a listener.
    #[must_use]
    pub fn scopes(&self) -> Vec<ScopeKey> {
        self.buses
            .borrow()
            .keys()
            .into_iter()
            .map(ScopeKey::from)
            .collect()
    }

    fn existing_bus(&self, key: &ScopeKey) -> Option<Rc<EventBus<T>>> {
        self.buses.borrow().get(key.as_str()).map(Rc::clone)
    }

    fn bus_for(&self, key: &ScopeKey) -> Rc<EventBus<T>> {
        let limit = self.max_listeners.get();
        let mut buses = self.buses.borrow_mut();
        Rc::clone(buses.get_or_insert_with(key.as_str(), || {
            Rc::new(EventBus::with_max_listeners(limit))
        }))
    }
}
