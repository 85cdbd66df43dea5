//! String-keyed map with an incrementally maintained entry count.
//!
//! [`OrderedMap`] is the storage primitive behind event buses, scoped
//! emitters and the request correlation pool. Keys iterate in sorted order,
//! which keeps fan-out deterministic; callers must not rely on insertion
//! order.

use std::collections::BTreeMap;

/// String-keyed storage with a running entry count.
///
/// The count is updated on every mutation instead of being recomputed, and
/// always equals the number of live keys.
#[derive(Debug, Clone)]
pub struct OrderedMap<V> {
    items: BTreeMap<String, V>,
    count: usize,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            count: 0,
        }
    }
}

impl<V> OrderedMap<V> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`, returning the previous value.
    ///
    /// The count only grows when `key` was not present.
    pub fn put(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let previous = self.items.insert(key.into(), value);
        if previous.is_none() {
            self.count += 1;
        }
        previous
    }

    /// Insert every pair from `entries`, overwriting existing keys.
    pub fn put_all<K, I>(&mut self, entries: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    /// Borrow the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.items.get(key)
    }

    /// Mutably borrow the value stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.items.get_mut(key)
    }

    /// Return the value under `key`, inserting `make()` first if absent.
    pub fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> V) -> &mut V {
        if !self.items.contains_key(key) {
            self.count += 1;
        }
        self.items.entry(key.to_string()).or_insert_with(make)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let removed = self.items.remove(key);
        if removed.is_some() {
            self.count -= 1;
        }
        removed
    }

    /// Snapshot of the current keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    /// Snapshot of references to the current values.
    #[must_use]
    pub fn values(&self) -> Vec<&V> {
        self.items.values().collect()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.items.clear();
        self.count = 0;
    }

    /// Whether the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of live entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.put_all(iter);
        map
    }
}

impl<K: Into<String>, V> Extend<(K, V)> for OrderedMap<V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.put_all(iter);
    }
}
