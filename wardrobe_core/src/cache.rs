//! Handle cache.
//!
//! Maps a key to the most recently cached live [`Reference`]. Lookups check
//! liveness and drop dead entries on the spot, so no sweep pass is needed.
//! Handed-out references are full owner tokens (see [`Reference::duplicate`]).

use std::{collections::HashMap, fmt::Debug, hash::Hash};

use tracing::debug;

use crate::{
    asset::{Asset, AssetId},
    reference::Reference,
};

/// Key-indexed store of live references.
pub struct HandleCache<K, T: Send + 'static> {
    entries: HashMap<K, Reference<T>>,
}

impl<K, T: Send + 'static> Default for HandleCache<K, T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Debug, T: Clone + Send + 'static> HandleCache<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    // Evicts the entry for `key` if it died since it was cached.
    fn live(&mut self, key: &K) -> Option<&Reference<T>> {
        if self.entries.get(key).is_some_and(|r| !r.is_alive()) {
            if let Some(mut dead) = self.entries.remove(key) {
                dead.release();
            }
            debug!(?key, "Evicted dead cache entry");
            return None;
        }
        self.entries.get(key)
    }

    /// Peeks at the cached value without taking ownership.
    pub fn try_get_value(&mut self, key: &K) -> Option<&T> {
        self.live(key).and_then(Reference::value)
    }

    /// Mints an additional owner token over the cached resource.
    pub fn try_get_new_reference(&mut self, key: &K) -> Option<Reference<T>> {
        self.live(key)
            .map(Reference::duplicate)
            .filter(Reference::is_alive)
    }

    /// Stores `reference` under `key`, releasing whatever it supersedes.
    ///
    /// A dead reference is not stored. A token over the resource that is
    /// already cached is released and the existing entry kept.
    pub fn cache_as(&mut self, key: K, mut reference: Reference<T>) -> bool {
        if !reference.is_alive() {
            return false;
        }

        if let Some(existing) = self.live(&key) {
            if existing.shares_resource_with(&reference) {
                reference.release();
                return true;
            }
        }

        if let Some(mut superseded) = self.entries.insert(key.clone(), reference) {
            debug!(?key, "Superseded cache entry");
            superseded.release();
        }
        true
    }

    /// Evicts one entry.
    pub fn release(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(mut reference) => {
                reference.release();
                true
            }
            None => false,
        }
    }

    /// Evicts everything.
    pub fn release_all(&mut self) {
        for (_, mut reference) in self.entries.drain() {
            reference.release();
        }
    }

    /// Whether an entry is stored (alive or not yet found dead).
    pub fn is_cached(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

impl<T: Asset> HandleCache<AssetId, T> {
    /// Stores `reference` keyed by its value's id.
    pub fn cache(&mut self, reference: Reference<T>) -> bool {
        match reference.value().map(|asset| asset.id().clone()) {
            Some(id) => self.cache_as(id, reference),
            None => false,
        }
    }
}
