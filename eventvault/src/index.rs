//! Owned secondary indices.
//!
//! A [`SecondaryIndex`] maps a lookup key (an entity, a read model type) to
//! the ordered set of primary keys stored under it. Registries mutate it in
//! the same function that mutates the primary collection so the two can
//! never drift apart.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Mapping from a secondary key to the primary keys it covers.
#[derive(Debug, Clone)]
pub struct SecondaryIndex<K, P> {
    entries: HashMap<K, BTreeSet<P>>,
}

impl<K, P> Default for SecondaryIndex<K, P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, P> SecondaryIndex<K, P>
where
    K: Eq + Hash,
    P: Ord,
{
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `primary` under `key`. Returns false if it was already there.
    pub fn insert(&mut self, key: K, primary: P) -> bool {
        self.entries.entry(key).or_default().insert(primary)
    }

    /// Removes `primary` from `key`, dropping the key once it is empty.
    pub fn remove(&mut self, key: &K, primary: &P) -> bool {
        let Some(primaries) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = primaries.remove(primary);
        if primaries.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    /// Primary keys recorded under `key`, in order.
    pub fn get(&self, key: &K) -> impl Iterator<Item = &P> + '_ {
        self.entries.get(key).into_iter().flatten()
    }

    /// Returns true if `key` has at least one primary key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct secondary keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
