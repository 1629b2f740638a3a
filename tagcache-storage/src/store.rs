//! Single- and multi-key tagged operations.
//!
//! Every mutation reads the key's previous envelope, diffs the old tag set
//! against the new one, updates the reverse index, then writes the value.
//! Index updates precede the value write and are never rolled back, so a
//! failed value write can leave a key over-indexed. Over-indexing only ever
//! causes extra invalidation, never a stale read: invalidating a stale member
//! deletes the key (or finds it already gone) and drops the membership.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tagcache_core::{
    decode_entry, decode_tag_list, decode_tags, dedup_tags, encode_entry, encode_tag_list,
    push_member, CacheEntry, CasToken, Expiry, KeyNamespace, StoredValue, Tag, TagCacheConfig,
    TagCacheResult, TagDiff, TagKeyMap,
};

use crate::backend::{KeyValueBackend, ResultMap, TagSetBackend, ValueMap};
use crate::index::{union_members, TagIndexAdapter};
use crate::{settle, KeyCount};

/// Tag-aware front end over a key-value backend.
///
/// `I` stores values and key-tags records; `T` stores tag member sets. Both
/// are usually the same backend (see [`TaggableStore::new`]).
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tagcache_core::{tags, Expiry};
/// use tagcache_storage::{MemoryBackend, TaggableStore};
///
/// let store = TaggableStore::new(Arc::new(MemoryBackend::new()));
/// store.set_with_tags("foo", &"bar", &tags(["lorem", "ipsum"]), Expiry::Never).await?;
/// store.invalidate_tags(&tags(["ipsum"])).await;
/// assert_eq!(store.get::<String>("foo").await?, None);
/// ```
pub struct TaggableStore<I: ?Sized, T: ?Sized = I> {
    items: Arc<I>,
    index: TagIndexAdapter<T>,
    default_expiry: Expiry,
}

impl<B> TaggableStore<B>
where
    B: KeyValueBackend + TagSetBackend + ?Sized,
{
    /// Store values and tag sets in the same backend, with the default
    /// key layout.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_namespace(backend, KeyNamespace::default())
    }

    pub fn with_namespace(backend: Arc<B>, namespace: KeyNamespace) -> Self {
        Self::with_tag_backend(Arc::clone(&backend), backend, namespace)
    }

    /// Build from a validated [`TagCacheConfig`].
    pub fn from_config(backend: Arc<B>, config: &TagCacheConfig) -> TagCacheResult<Self> {
        let store = Self::with_namespace(backend, config.namespace()?);
        Ok(Self {
            default_expiry: config.default_expiry(),
            ..store
        })
    }
}

impl<I, T> TaggableStore<I, T>
where
    I: KeyValueBackend + ?Sized,
    T: TagSetBackend + ?Sized,
{
    /// Keep tag sets in a separate backend from values.
    pub fn with_tag_backend(items: Arc<I>, tags: Arc<T>, namespace: KeyNamespace) -> Self {
        Self {
            items,
            index: TagIndexAdapter::new(tags, namespace),
            default_expiry: Expiry::Never,
        }
    }

    pub fn tag_index(&self) -> &TagIndexAdapter<T> {
        &self.index
    }

    pub fn namespace(&self) -> &KeyNamespace {
        self.index.namespace()
    }

    /// Expiry configured for callers that do not choose one.
    pub fn default_expiry(&self) -> Expiry {
        self.default_expiry
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The decoded record under `key`, envelope included.
    pub async fn get_plain(
        &self,
        key: &str,
    ) -> TagCacheResult<Option<StoredValue<serde_json::Value>>> {
        self.namespace().validate_key(key)?;
        match settle("get", key, self.items.get(key).await) {
            Some(bytes) => Ok(Some(decode_entry(key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn get_multi_plain(
        &self,
        keys: &[String],
    ) -> TagCacheResult<HashMap<String, StoredValue<serde_json::Value>>> {
        self.decode_multi(keys).await
    }

    /// The value under `key`, without its tags.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> TagCacheResult<Option<V>> {
        self.namespace().validate_key(key)?;
        match settle("get", key, self.items.get(key).await) {
            Some(bytes) => Ok(Some(decode_entry::<V>(key, &bytes)?.into_value())),
            None => Ok(None),
        }
    }

    pub async fn get_with_token<V: DeserializeOwned>(
        &self,
        key: &str,
    ) -> TagCacheResult<Option<(V, CasToken)>> {
        self.namespace().validate_key(key)?;
        match settle("get_with_token", key, self.items.get_with_token(key).await) {
            Some((bytes, token)) => Ok(Some((decode_entry::<V>(key, &bytes)?.into_value(), token))),
            None => Ok(None),
        }
    }

    /// Values of the keys that exist. Keys whose stored value does not decode
    /// as `V` are left out.
    pub async fn get_multi<V: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> TagCacheResult<HashMap<String, V>> {
        Ok(self
            .decode_multi::<V>(keys)
            .await?
            .into_iter()
            .map(|(k, stored)| (k, stored.into_value()))
            .collect())
    }

    /// Tags of the envelope currently stored under `key`.
    pub async fn current_tags(&self, key: &str) -> TagCacheResult<Vec<Tag>> {
        self.namespace().validate_key(key)?;
        Ok(settle("get", key, self.items.get(key).await)
            .map(|bytes| decode_tags(&bytes))
            .unwrap_or_default())
    }

    async fn decode_multi<V: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> TagCacheResult<HashMap<String, StoredValue<V>>> {
        self.validate_all(keys)?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let found = settle("get_multi", KeyCount(keys.len()), self.items.get_multi(keys).await);
        let mut decoded = HashMap::with_capacity(found.len());
        for (key, bytes) in found {
            match decode_entry(&key, &bytes) {
                Ok(stored) => {
                    decoded.insert(key, stored);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "stored value undecodable, skipped");
                }
            }
        }
        Ok(decoded)
    }

    // ------------------------------------------------------------------
    // Tagged writes
    // ------------------------------------------------------------------

    /// Untagged write. Identical to `set_with_tags(key, value, &[], expiry)`.
    pub async fn set<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        self.set_with_tags(key, value, &[], expiry).await
    }

    /// Write `value` under `key` with exactly `tags`.
    ///
    /// Returns the backend's success flag for the value record. `Err` only for
    /// an invalid key or a value that cannot be encoded.
    pub async fn set_with_tags<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        tags: &[Tag],
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        let ns = self.namespace();
        ns.validate_key(key)?;

        let new_tags = dedup_tags(tags);
        let envelope = encode_entry(key, &CacheEntry::new(value, new_tags.clone()))?;
        let record = encode_tag_list(key, &new_tags)?;

        let old_tags = settle("get", key, self.items.get(key).await)
            .map(|bytes| decode_tags(&bytes))
            .unwrap_or_default();

        let diff = TagDiff::between(&old_tags, &new_tags);
        if !diff.removed.is_empty() {
            self.index.remove_key_from_tags(key, &diff.removed).await;
        }
        if !diff.current.is_empty() {
            self.index.add_key_to_tags(key, &diff.current).await;
        }

        let mut writes = ValueMap::with_capacity(2);
        writes.insert(key.to_string(), envelope);
        if !old_tags.is_empty() || !new_tags.is_empty() {
            writes.insert(ns.key_tags_key(key), record);
        }

        let results = settle("set_multi", key, self.items.set_multi(writes, expiry).await);
        Ok(results.get(key).copied().unwrap_or(false))
    }

    /// Untagged batch write.
    pub async fn set_multi<V: Serialize>(
        &self,
        items: &HashMap<String, V>,
        expiry: Expiry,
    ) -> TagCacheResult<ResultMap> {
        self.set_multi_with_tags(items, &HashMap::new(), expiry).await
    }

    /// Write several values, each with its own tags, in a fixed number of
    /// round trips: one multi-get, at most one consolidated index removal,
    /// at most one consolidated index addition, one multi-set.
    ///
    /// Keys missing from `tags_by_key` are written untagged. The result map
    /// covers exactly the keys of `items`.
    pub async fn set_multi_with_tags<V: Serialize>(
        &self,
        items: &HashMap<String, V>,
        tags_by_key: &HashMap<String, Vec<Tag>>,
        expiry: Expiry,
    ) -> TagCacheResult<ResultMap> {
        let ns = self.namespace();
        ns.validate_keys(items.keys().map(String::as_str))?;
        if items.is_empty() {
            return Ok(ResultMap::new());
        }

        // Encode everything up front so an encode failure mutates nothing.
        let mut encoded = Vec::with_capacity(items.len());
        for (key, value) in items {
            let new_tags = tags_by_key
                .get(key)
                .map(|t| dedup_tags(t))
                .unwrap_or_default();
            let envelope = encode_entry(key, &CacheEntry::new(value, new_tags.clone()))?;
            let record = encode_tag_list(key, &new_tags)?;
            encoded.push((key.clone(), new_tags, envelope, record));
        }

        let keys: Vec<String> = items.keys().cloned().collect();
        let previous = settle("get_multi", KeyCount(keys.len()), self.items.get_multi(&keys).await);

        let mut to_remove = TagKeyMap::new();
        let mut to_add = TagKeyMap::new();
        let mut writes = ValueMap::with_capacity(encoded.len() * 2);

        for (key, new_tags, envelope, record) in encoded {
            let old_tags = previous
                .get(&key)
                .map(|bytes| decode_tags(bytes))
                .unwrap_or_default();
            let diff = TagDiff::between(&old_tags, &new_tags);
            for tag in &diff.removed {
                push_member(&mut to_remove, tag, &key);
            }
            for tag in &diff.current {
                push_member(&mut to_add, tag, &key);
            }

            if !old_tags.is_empty() || !new_tags.is_empty() {
                writes.insert(ns.key_tags_key(&key), record);
            }
            writes.insert(key, envelope);
        }

        if !to_remove.is_empty() {
            self.index.remove_keys_from_tags(&to_remove).await;
        }
        if !to_add.is_empty() {
            self.index.add_keys_to_tags(&to_add).await;
        }

        tracing::debug!(
            keys = keys.len(),
            removed_tags = to_remove.len(),
            added_tags = to_add.len(),
            "batched tagged write"
        );

        let results = settle(
            "set_multi",
            KeyCount(writes.len()),
            self.items.set_multi(writes, expiry).await,
        );
        Ok(keys
            .into_iter()
            .map(|k| {
                let ok = results.get(&k).copied().unwrap_or(false);
                (k, ok)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Deletes and invalidation
    // ------------------------------------------------------------------

    /// Delete `key`, its key-tags record and its tag memberships.
    pub async fn delete(&self, key: &str) -> TagCacheResult<bool> {
        let ns = self.namespace();
        ns.validate_key(key)?;

        let old_tags = settle("get", key, self.items.get(key).await)
            .map(|bytes| decode_tags(&bytes))
            .unwrap_or_default();
        if !old_tags.is_empty() {
            self.index.remove_key_from_tags(key, &old_tags).await;
        }

        let targets = [key.to_string(), ns.key_tags_key(key)];
        let results = settle("delete_multi", key, self.items.delete_multi(&targets).await);
        Ok(results.get(key).copied().unwrap_or(false))
    }

    pub async fn delete_multi(&self, keys: &[String]) -> TagCacheResult<ResultMap> {
        self.validate_all(keys)?;
        Ok(self.delete_members(keys, TagKeyMap::new()).await)
    }

    /// Delete every key currently indexed under any of `tags`.
    ///
    /// Tag sets are not cleared directly; they empty out as each member's
    /// memberships are removed on the normal delete path. A failed member
    /// lookup invalidates nothing.
    pub async fn invalidate_tags(&self, tags: &[Tag]) -> ResultMap {
        if tags.is_empty() {
            return ResultMap::new();
        }
        let by_tag = match self.index.members_by_tag(tags).await {
            Ok(by_tag) => by_tag,
            Err(e) => {
                tracing::warn!(tags = tags.len(), error = %e, "failed to resolve tag members");
                return ResultMap::new();
            }
        };
        let keys = union_members(tags, &by_tag);
        tracing::debug!(tags = tags.len(), members = keys.len(), "invalidating tags");
        self.delete_members(&keys, by_tag).await
    }

    /// Multi-key delete without key validation. Index members are trusted.
    ///
    /// `to_remove` holds memberships to drop in addition to the ones found in
    /// the stored envelopes, so members whose value is already gone still
    /// leave the invalidated tags.
    async fn delete_members(&self, keys: &[String], mut to_remove: TagKeyMap) -> ResultMap {
        if keys.is_empty() {
            return ResultMap::new();
        }
        let ns = self.namespace();

        let previous = settle("get_multi", KeyCount(keys.len()), self.items.get_multi(keys).await);
        for (key, bytes) in &previous {
            for tag in decode_tags(bytes) {
                push_member(&mut to_remove, &tag, key);
            }
        }
        if !to_remove.is_empty() {
            self.index.remove_keys_from_tags(&to_remove).await;
        }

        let targets: Vec<String> = keys
            .iter()
            .cloned()
            .chain(keys.iter().map(|k| ns.key_tags_key(k)))
            .collect();
        let results = settle(
            "delete_multi",
            KeyCount(targets.len()),
            self.items.delete_multi(&targets).await,
        );

        keys.iter()
            .map(|k| (k.clone(), results.get(k).copied().unwrap_or(false)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Untagged conditional writes
    //
    // A successful write leaves the key untagged, so the memberships and
    // key-tags record of whatever it overwrote are dropped afterwards.
    // ------------------------------------------------------------------

    /// Store only if absent. The envelope carries no tags.
    pub async fn add<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        let bytes = self.untagged(key, value)?;
        let ok = settle("add", key, self.items.add(key, bytes, expiry).await);
        if ok {
            self.detach_tags(key).await;
        }
        Ok(ok)
    }

    /// Store only if present. The envelope carries no tags.
    pub async fn replace<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        let bytes = self.untagged(key, value)?;
        let ok = settle("replace", key, self.items.replace(key, bytes, expiry).await);
        if ok {
            self.detach_tags(key).await;
        }
        Ok(ok)
    }

    /// Store only if unchanged since `token`. The envelope carries no tags.
    pub async fn cas<V: Serialize>(
        &self,
        token: CasToken,
        key: &str,
        value: &V,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        let bytes = self.untagged(key, value)?;
        let ok = settle("cas", key, self.items.cas(token, key, bytes, expiry).await);
        if ok {
            self.detach_tags(key).await;
        }
        Ok(ok)
    }

    fn untagged<V: Serialize>(&self, key: &str, value: &V) -> TagCacheResult<Vec<u8>> {
        self.namespace().validate_key(key)?;
        Ok(encode_entry(key, &CacheEntry::untagged(value))?)
    }

    /// Drop the memberships listed in `key`'s key-tags record, then the record.
    async fn detach_tags(&self, key: &str) {
        let record_key = self.namespace().key_tags_key(key);
        let Some(bytes) = settle("get", &record_key, self.items.get(&record_key).await) else {
            return;
        };
        let old_tags = decode_tag_list(&bytes);
        if !old_tags.is_empty() {
            self.index.remove_key_from_tags(key, &old_tags).await;
        }
        settle("delete", &record_key, self.items.delete(&record_key).await);
    }

    // ------------------------------------------------------------------
    // Counters and passthroughs
    // ------------------------------------------------------------------

    /// Add `offset` to the integer under `key`, creating it as `initial` if
    /// absent. Tags are preserved.
    ///
    /// `None` if the stored value is not an integer or a concurrent writer
    /// changed the key between read and write.
    pub async fn increment(
        &self,
        key: &str,
        offset: i64,
        initial: i64,
        expiry: Expiry,
    ) -> TagCacheResult<Option<i64>> {
        self.update_counter(key, initial, expiry, |n| n.saturating_add(offset))
            .await
    }

    /// Subtract `offset`, never going below zero.
    pub async fn decrement(
        &self,
        key: &str,
        offset: i64,
        initial: i64,
        expiry: Expiry,
    ) -> TagCacheResult<Option<i64>> {
        self.update_counter(key, initial, expiry, |n| n.saturating_sub(offset).max(0))
            .await
    }

    async fn update_counter<F>(
        &self,
        key: &str,
        initial: i64,
        expiry: Expiry,
        step: F,
    ) -> TagCacheResult<Option<i64>>
    where
        F: FnOnce(i64) -> i64,
    {
        self.namespace().validate_key(key)?;

        let current = settle("get_with_token", key, self.items.get_with_token(key).await);
        let Some((bytes, token)) = current else {
            let created = encode_entry(key, &CacheEntry::untagged(initial))?;
            let ok = settle("add", key, self.items.add(key, created, expiry).await);
            if ok {
                self.detach_tags(key).await;
            }
            return Ok(ok.then_some(initial));
        };

        let stored = match decode_entry::<serde_json::Value>(key, &bytes) {
            Ok(stored) => stored.into_entry(),
            Err(e) => {
                tracing::debug!(key, error = %e, "counter value undecodable");
                return Ok(None);
            }
        };
        let Some(current) = stored.value().as_i64() else {
            return Ok(None);
        };

        let next = step(current);
        let updated = encode_entry(key, &stored.map(|_| next))?;
        let ok = settle("cas", key, self.items.cas(token, key, updated, expiry).await);
        Ok(ok.then_some(next))
    }

    /// Reset the expiry of `key` and of its key-tags record.
    pub async fn touch(&self, key: &str, expiry: Expiry) -> TagCacheResult<bool> {
        let ns = self.namespace();
        ns.validate_key(key)?;
        let touched = settle("touch", key, self.items.touch(key, expiry).await);
        if touched {
            let record_key = ns.key_tags_key(key);
            settle("touch", &record_key, self.items.touch(&record_key, expiry).await);
        }
        Ok(touched)
    }

    /// Drop everything in the items backend.
    pub async fn flush(&self) -> bool {
        settle("flush", "*", self.items.flush().await)
    }

    fn validate_all(&self, keys: &[String]) -> TagCacheResult<()> {
        Ok(self.namespace().validate_keys(keys.iter().map(String::as_str))?)
    }
}
