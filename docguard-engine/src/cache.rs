//! Process-lifetime key/value cache
//!
//! Memoizes per-request computations (resolved global permissions,
//! document permissions). There is no eviction policy and no TTL: callers
//! decide when entries go away. Every operation takes the lock once, so a
//! single read-modify-write never interleaves with another writer on the
//! same cache.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared key/value store with individually atomic operations
pub struct Cache<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value, returning the previous one
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.write().insert(key, value)
    }

    /// Get a value; `None` when absent
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().get(key).cloned()
    }

    /// Insert `value` unless the key is already present, then return the
    /// stored value. Concurrent callers racing on the same key all observe
    /// whichever value landed first.
    pub fn get_or_insert(&self, key: K, value: V) -> V {
        self.write().entry(key).or_insert(value).clone()
    }

    /// Remove a value; returns whether it was present
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.write().remove(key).is_some()
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().contains_key(key)
    }

    /// Snapshot of the current keys
    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of the current values
    pub fn values(&self) -> Vec<V> {
        self.read().values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.read().len()
    }

    /// Keep only entries whose key satisfies `keep`; returns how many were removed
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|k, _| keep(k));
        before - entries.len()
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("size", &self.size()).finish()
    }
}
