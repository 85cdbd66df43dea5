//! Pending request callbacks keyed by correlation id.
//!
//! Each entry pairs the caller's reply callback with the id of the eviction
//! timer armed for it. Resolving an entry and evicting it are both plain
//! removals; whichever happens first wins and the other finds nothing.

use serde_json::Value;
use uuid::Uuid;

use crate::collections::OrderedMap;
use crate::timer::TimerId;

/// Callback receiving the full reply payload of a correlated request.
pub type ReplyCallback = Box<dyn FnOnce(Value)>;

/// Generate a fresh correlation id (UUID v4, hyphenated).
#[must_use]
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// One request waiting for its reply.
pub struct Pending {
    /// Invoked with the reply payload.
    pub callback: ReplyCallback,
    /// Eviction timer to cancel once the reply arrives.
    pub timer: TimerId,
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

/// Pool of pending requests.
#[derive(Debug, Default)]
pub struct CorrelationPool {
    pending: OrderedMap<Pending>,
}

impl CorrelationPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request. Ids are not checked for collisions.
    pub fn insert(&mut self, id: String, callback: ReplyCallback, timer: TimerId) {
        self.pending.put(id, Pending { callback, timer });
    }

    /// Remove and return the entry for `id`.
    pub fn take(&mut self, id: &str) -> Option<Pending> {
        self.pending.remove(id)
    }

    /// Drop the entry for `id` without resolving it.
    pub fn evict(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<Pending> {
        let ids = self.pending.keys();
        ids.iter().filter_map(|id| self.pending.remove(id)).collect()
    }

    /// Whether `id` is still waiting.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of waiting requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.count()
    }

    /// Whether no request is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
