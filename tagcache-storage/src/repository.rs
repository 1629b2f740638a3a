//! Coalesced current-tag lookups for pool items.
//!
//! Items register a handle when they are fetched; nothing is read until the
//! first time any handle's tags are asked for. That first query resolves
//! every outstanding handle with one multi-get, so N lookups cost one round
//! trip instead of N.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tagcache_core::{decode_tags, ItemHandle, Tag};

use crate::backend::KeyValueBackend;
use crate::KeyCount;

/// Per-pool cache from item handle to the tags stored under its key.
pub struct TaggableRepository<B: ?Sized> {
    backend: Arc<B>,
    registered: HashMap<ItemHandle, String>,
    unresolved: HashMap<ItemHandle, String>,
    resolved: HashMap<ItemHandle, Vec<Tag>>,
}

impl<B: KeyValueBackend + ?Sized> TaggableRepository<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            registered: HashMap::new(),
            unresolved: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    /// Track `handle` for `key`. Resolution is deferred to the next lookup.
    pub fn register(&mut self, handle: ItemHandle, key: impl Into<String>) {
        let key = key.into();
        self.resolved.remove(&handle);
        self.unresolved.insert(handle, key.clone());
        self.registered.insert(handle, key);
    }

    /// Forget `handle`, resolved or not.
    pub fn remove(&mut self, handle: &ItemHandle) {
        self.registered.remove(handle);
        self.unresolved.remove(handle);
        self.resolved.remove(handle);
    }

    /// Forget every handle registered for `key`.
    pub fn remove_key(&mut self, key: &str) {
        self.remove_keys([key]);
    }

    /// Forget every handle registered for any of `keys`. Called once those
    /// keys are rewritten, so no handle outlives the value it was fetched for.
    pub fn remove_keys<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keys: HashSet<&str> = keys.into_iter().collect();
        if keys.is_empty() {
            return;
        }
        let handles: Vec<ItemHandle> = self
            .registered
            .iter()
            .filter(|(_, k)| keys.contains(k.as_str()))
            .map(|(h, _)| *h)
            .collect();
        for handle in &handles {
            self.remove(handle);
        }
    }

    pub fn exists(&self, handle: &ItemHandle) -> bool {
        self.registered.contains_key(handle)
    }

    /// Number of handles tracked, resolved or not.
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Number of handles still waiting for resolution.
    pub fn pending(&self) -> usize {
        self.unresolved.len()
    }

    /// Tags currently stored under the handle's key.
    ///
    /// Unknown handles, missing keys and values that are not tagged envelopes
    /// all resolve to no tags. A failed backend read also yields no tags for
    /// every handle in that window.
    pub async fn current_tags(&mut self, handle: &ItemHandle) -> Vec<Tag> {
        if !self.registered.contains_key(handle) {
            return Vec::new();
        }
        if let Some(tags) = self.resolved.get(handle) {
            return tags.clone();
        }
        self.resolve_pending().await;
        self.resolved.get(handle).cloned().unwrap_or_default()
    }

    async fn resolve_pending(&mut self) {
        if self.unresolved.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.unresolved);

        let mut seen = HashSet::new();
        let keys: Vec<String> = pending
            .values()
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect();

        let found = match self.backend.get_multi(&keys).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    keys = %KeyCount(keys.len()),
                    error = %e,
                    "failed to resolve current tags"
                );
                Default::default()
            }
        };

        for (handle, key) in pending {
            let tags = found.get(&key).map(|b| decode_tags(b)).unwrap_or_default();
            self.resolved.insert(handle, tags);
        }
    }

    /// Drop all state.
    pub fn clear(&mut self) {
        self.registered.clear();
        self.unresolved.clear();
        self.resolved.clear();
    }
}
