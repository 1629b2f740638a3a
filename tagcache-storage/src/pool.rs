//! Deferred tagged writes committed in one round trip.
//!
//! The pool tracks each pending key's previous tag membership through its
//! key-tags record, fetched once when the key is first queued. On commit it
//! loads the member lists of every tag that changes, edits them in memory and
//! writes values, key-tags records and whole member lists with a single
//! [`BatchBackend::apply`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tagcache_core::{
    decode_entry, decode_tag_list, dedup_tags, encode_entry, encode_tag_list, push_member,
    CacheEntry, Expiry, ItemHandle, KeyNamespace, Tag, TagCacheConfig, TagCacheResult, TagDiff,
    TagKeyMap,
};

use crate::backend::{BatchBackend, ResultMap, WriteBatch};
use crate::index::{union_members, TagIndexAdapter};
use crate::repository::TaggableRepository;
use crate::{settle, KeyCount};

/// A pool lookup result, and the unit of writing back.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggableItem<V> {
    handle: ItemHandle,
    key: String,
    value: Option<V>,
    hit: bool,
    tags: Vec<Tag>,
    expiry: Expiry,
}

impl<V> TaggableItem<V> {
    fn miss(key: String, expiry: Expiry) -> Self {
        Self {
            handle: ItemHandle::new(),
            key,
            value: None,
            hit: false,
            tags: Vec::new(),
            expiry,
        }
    }

    fn hit(key: String, value: V, expiry: Expiry) -> Self {
        Self {
            value: Some(value),
            hit: true,
            ..Self::miss(key, expiry)
        }
    }

    pub fn handle(&self) -> ItemHandle {
        self.handle
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Whether the lookup found a value (stored or pending).
    pub fn is_hit(&self) -> bool {
        self.hit
    }

    /// Tags the item will be saved with. Starts empty on every lookup.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn set(mut self, value: V) -> Self {
        self.value = Some(value);
        self
    }

    /// Replace the tags to save with. Duplicates collapse.
    pub fn set_tags(mut self, tags: &[Tag]) -> Self {
        self.tags = dedup_tags(tags);
        self
    }

    pub fn expires_after(mut self, ttl: Duration) -> Self {
        self.expiry = Expiry::from(ttl);
        self
    }

    pub fn expires_never(mut self) -> Self {
        self.expiry = Expiry::Never;
        self
    }
}

/// A write handed to [`TaggablePool::save`] or [`TaggablePool::save_deferred`].
#[derive(Debug, Clone, PartialEq)]
pub enum PoolWrite<V> {
    /// An item from a lookup, with its new value and tags.
    Tagged(TaggableItem<V>),
    /// A value with no tags.
    Plain { key: String, value: V, expiry: Expiry },
}

impl<V> From<TaggableItem<V>> for PoolWrite<V> {
    fn from(item: TaggableItem<V>) -> Self {
        PoolWrite::Tagged(item)
    }
}

impl<V> PoolWrite<V> {
    fn key(&self) -> &str {
        match self {
            PoolWrite::Tagged(item) => &item.key,
            PoolWrite::Plain { key, .. } => key,
        }
    }

    /// `None` for an item that was never given a value.
    fn into_parts(self) -> Option<(String, V, Vec<Tag>, Expiry)> {
        match self {
            PoolWrite::Tagged(item) => {
                let value = item.value?;
                Some((item.key, value, item.tags, item.expiry))
            }
            PoolWrite::Plain { key, value, expiry } => Some((key, value, Vec::new(), expiry)),
        }
    }
}

/// A queued write with its encoded records.
#[derive(Debug, Clone)]
struct Deferred<V> {
    value: V,
    tags: Vec<Tag>,
    expiry: Expiry,
    envelope: Vec<u8>,
    record: Vec<u8>,
}

/// Tag-aware cache pool with a deferred-write queue.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tagcache_core::tags;
/// use tagcache_storage::{MemoryBackend, TaggablePool};
///
/// let mut pool: TaggablePool<_, String> = TaggablePool::new(Arc::new(MemoryBackend::new()));
/// let item = pool.get_item("foo").await?;
/// pool.save_deferred(item.set("bar".into()).set_tags(&tags(["lorem"])).into()).await?;
/// assert!(pool.commit().await);
/// ```
pub struct TaggablePool<B: ?Sized, V> {
    backend: Arc<B>,
    index: TagIndexAdapter<B>,
    repository: TaggableRepository<B>,
    deferred: BTreeMap<String, Deferred<V>>,
    previous_tags: HashMap<String, Vec<Tag>>,
    default_expiry: Expiry,
}

impl<B, V> TaggablePool<B, V>
where
    B: BatchBackend + ?Sized,
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_namespace(backend, KeyNamespace::default())
    }

    pub fn with_namespace(backend: Arc<B>, namespace: KeyNamespace) -> Self {
        Self {
            index: TagIndexAdapter::new(Arc::clone(&backend), namespace),
            repository: TaggableRepository::new(Arc::clone(&backend)),
            backend,
            deferred: BTreeMap::new(),
            previous_tags: HashMap::new(),
            default_expiry: Expiry::Never,
        }
    }

    /// Build from a validated [`TagCacheConfig`]. New items expire after the
    /// configured default TTL.
    pub fn from_config(backend: Arc<B>, config: &TagCacheConfig) -> TagCacheResult<Self> {
        let mut pool = Self::with_namespace(backend, config.namespace()?);
        pool.default_expiry = config.default_expiry();
        Ok(pool)
    }

    pub fn tag_index(&self) -> &TagIndexAdapter<B> {
        &self.index
    }

    fn namespace(&self) -> &KeyNamespace {
        self.index.namespace()
    }

    /// Number of writes waiting for [`Self::commit`].
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Look up `key`. A pending deferred write wins over the stored value.
    ///
    /// Stored values that do not decode as `V` are reported as misses.
    pub async fn get_item(&mut self, key: &str) -> TagCacheResult<TaggableItem<V>> {
        self.namespace().validate_key(key)?;

        let item = match self.deferred.get(key) {
            Some(pending) => {
                TaggableItem::hit(key.to_string(), pending.value.clone(), pending.expiry)
            }
            None => {
                let bytes = settle("get", key, self.backend.get(key).await);
                self.item_from(key.to_string(), bytes.as_deref())
            }
        };
        self.repository.register(item.handle, key);
        Ok(item)
    }

    /// Look up several keys with one backend read. Items come back in the
    /// order of `keys`, and all are registered before any tags are resolved.
    pub async fn get_items(&mut self, keys: &[String]) -> TagCacheResult<Vec<TaggableItem<V>>> {
        self.namespace()
            .validate_keys(keys.iter().map(String::as_str))?;

        let to_fetch: Vec<String> = keys
            .iter()
            .filter(|k| !self.deferred.contains_key(k.as_str()))
            .cloned()
            .collect();
        let found = if to_fetch.is_empty() {
            Default::default()
        } else {
            settle(
                "get_multi",
                KeyCount(to_fetch.len()),
                self.backend.get_multi(&to_fetch).await,
            )
        };

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let item = match self.deferred.get(key) {
                Some(pending) => {
                    TaggableItem::hit(key.clone(), pending.value.clone(), pending.expiry)
                }
                None => self.item_from(key.clone(), found.get(key).map(Vec::as_slice)),
            };
            self.repository.register(item.handle, key.as_str());
            items.push(item);
        }
        Ok(items)
    }

    fn item_from(&self, key: String, bytes: Option<&[u8]>) -> TaggableItem<V> {
        let Some(bytes) = bytes else {
            return TaggableItem::miss(key, self.default_expiry);
        };
        match decode_entry::<V>(&key, bytes) {
            Ok(stored) => TaggableItem::hit(key, stored.into_value(), self.default_expiry),
            Err(e) => {
                tracing::debug!(
                    key = %key,
                    error = %e,
                    "stored value undecodable, treating as miss"
                );
                TaggableItem::miss(key, self.default_expiry)
            }
        }
    }

    /// Tags currently stored for the item's key. Misses have none, and so do
    /// items fetched before their key was last saved or committed; look the
    /// key up again to see its new tags.
    pub async fn current_tags(&mut self, item: &TaggableItem<V>) -> Vec<Tag> {
        if !item.is_hit() {
            return Vec::new();
        }
        self.repository.current_tags(&item.handle).await
    }

    pub async fn has_item(&self, key: &str) -> TagCacheResult<bool> {
        self.namespace().validate_key(key)?;
        if self.deferred.contains_key(key) {
            return Ok(true);
        }
        Ok(settle("get", key, self.backend.get(key).await).is_some())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write one item now. Pending deferred writes are left queued, except a
    /// pending write to the same key, which this write supersedes.
    pub async fn save(&mut self, write: PoolWrite<V>) -> TagCacheResult<bool> {
        let Some((key, deferred)) = self.prepare(write)? else {
            return Ok(false);
        };
        self.deferred.remove(&key);
        self.previous_tags.remove(&key);

        let previous = self.fetch_previous_tags(&key).await;
        let writes = BTreeMap::from([(key.clone(), deferred)]);
        let previous = HashMap::from([(key.clone(), previous)]);
        let ok = self.write_batch(writes, previous).await;
        self.repository.remove_key(&key);
        Ok(ok)
    }

    /// Queue a write for the next [`Self::commit`]. A later write to the same
    /// key replaces the earlier one.
    pub async fn save_deferred(&mut self, write: PoolWrite<V>) -> TagCacheResult<bool> {
        let Some((key, deferred)) = self.prepare(write)? else {
            return Ok(false);
        };
        if !self.previous_tags.contains_key(&key) {
            let previous = self.fetch_previous_tags(&key).await;
            self.previous_tags.insert(key.clone(), previous);
        }
        self.deferred.insert(key, deferred);
        Ok(true)
    }

    /// Flush every deferred write in one backend round trip.
    ///
    /// Returns `false` if any record in the batch failed to write. The queue
    /// is emptied either way, and tag lookups for the committed keys are
    /// released.
    pub async fn commit(&mut self) -> bool {
        if self.deferred.is_empty() {
            return true;
        }
        let writes = std::mem::take(&mut self.deferred);
        let previous: HashMap<String, Vec<Tag>> = writes
            .keys()
            .map(|k| (k.clone(), self.previous_tags.remove(k).unwrap_or_default()))
            .collect();
        let keys: Vec<String> = writes.keys().cloned().collect();

        let ok = self.write_batch(writes, previous).await;
        self.repository.remove_keys(keys.iter().map(String::as_str));
        ok
    }

    fn prepare(&self, write: PoolWrite<V>) -> TagCacheResult<Option<(String, Deferred<V>)>> {
        self.namespace().validate_key(write.key())?;
        let Some((key, value, tags, expiry)) = write.into_parts() else {
            return Ok(None);
        };
        let tags = dedup_tags(&tags);
        let envelope = encode_entry(&key, &CacheEntry::new(&value, tags.clone()))?;
        let record = encode_tag_list(&key, &tags)?;
        Ok(Some((
            key,
            Deferred {
                value,
                tags,
                expiry,
                envelope,
                record,
            },
        )))
    }

    /// Tags recorded for `key` by its key-tags record.
    async fn fetch_previous_tags(&self, key: &str) -> Vec<Tag> {
        let record_key = self.namespace().key_tags_key(key);
        settle("get", &record_key, self.backend.get(&record_key).await)
            .map(|bytes| decode_tag_list(&bytes))
            .unwrap_or_default()
    }

    /// Reconcile member lists for `writes` and apply everything in one batch.
    async fn write_batch(
        &self,
        writes: BTreeMap<String, Deferred<V>>,
        previous: HashMap<String, Vec<Tag>>,
    ) -> bool {
        let ns = self.namespace();
        let no_tags = Vec::new();

        let diffs: Vec<(&String, &Vec<Tag>, TagDiff)> = writes
            .iter()
            .map(|(key, pending)| {
                let old = previous.get(key).unwrap_or(&no_tags);
                (key, old, TagDiff::between(old, &pending.tags))
            })
            .collect();

        let touched = dedup_tags(
            diffs
                .iter()
                .flat_map(|(_, _, diff)| diff.removed.iter().chain(&diff.current)),
        );
        let mut members = if touched.is_empty() {
            TagKeyMap::new()
        } else {
            match self.index.members_by_tag(&touched).await {
                Ok(members) => members,
                Err(e) => {
                    tracing::warn!(
                        tags = touched.len(),
                        error = %e,
                        "failed to load tag members, commit aborted"
                    );
                    return false;
                }
            }
        };

        let mut dirty = BTreeSet::new();
        for (key, _, diff) in &diffs {
            for tag in &diff.removed {
                if let Some(list) = members.get_mut(tag) {
                    let before = list.len();
                    list.retain(|k| k != *key);
                    if list.len() != before {
                        dirty.insert(tag.clone());
                    }
                }
            }
            for tag in &diff.current {
                let already = members.get(tag).is_some_and(|list| list.contains(*key));
                if !already {
                    push_member(&mut members, tag, key);
                    dirty.insert(tag.clone());
                }
            }
        }

        let mut batch = WriteBatch::new();
        for (key, old, _) in &diffs {
            let pending = &writes[*key];
            batch.put_value((*key).clone(), pending.envelope.clone(), pending.expiry);
            if !old.is_empty() || !pending.tags.is_empty() {
                batch.put_value(ns.key_tags_key(key), pending.record.clone(), pending.expiry);
            }
        }
        for tag in &dirty {
            batch.put_set(ns.tag_key(tag), members.remove(tag).unwrap_or_default());
        }

        let expected = batch.len();
        tracing::debug!(
            values = writes.len(),
            tag_sets = dirty.len(),
            records = expected,
            "committing tagged batch"
        );

        match self.backend.apply(batch).await {
            Ok(results) => {
                let failed = results.values().filter(|ok| !**ok).count();
                let ok = failed == 0 && results.len() == expected;
                if !ok {
                    tracing::warn!(
                        failed,
                        expected,
                        reported = results.len(),
                        "batch commit incomplete"
                    );
                }
                ok
            }
            Err(e) => {
                tracing::warn!(records = expected, error = %e, "batch commit failed");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Deletes and invalidation
    // ------------------------------------------------------------------

    pub async fn delete_item(&mut self, key: &str) -> TagCacheResult<bool> {
        let results = self.delete_items(&[key.to_string()]).await?;
        Ok(results.get(key).copied().unwrap_or(false))
    }

    /// Delete values, their key-tags records and their tag memberships.
    /// Pending deferred writes for these keys are discarded.
    pub async fn delete_items(&mut self, keys: &[String]) -> TagCacheResult<ResultMap> {
        self.namespace()
            .validate_keys(keys.iter().map(String::as_str))?;
        self.purge(keys);
        Ok(self.delete_members(keys, TagKeyMap::new()).await)
    }

    /// Delete every key indexed under any of `tags`.
    pub async fn invalidate_tags(&mut self, tags: &[Tag]) -> ResultMap {
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
        self.purge(&keys);
        self.delete_members(&keys, by_tag).await
    }

    fn purge(&mut self, keys: &[String]) {
        for key in keys {
            self.deferred.remove(key);
            self.previous_tags.remove(key);
            self.repository.remove_key(key);
        }
    }

    /// `to_remove` is seeded with memberships to drop regardless of what the
    /// key-tags records say.
    async fn delete_members(&self, keys: &[String], mut to_remove: TagKeyMap) -> ResultMap {
        if keys.is_empty() {
            return ResultMap::new();
        }
        let ns = self.namespace();
        let record_keys: Vec<String> = keys.iter().map(|k| ns.key_tags_key(k)).collect();

        let records = settle(
            "get_multi",
            KeyCount(record_keys.len()),
            self.backend.get_multi(&record_keys).await,
        );
        for (key, record_key) in keys.iter().zip(&record_keys) {
            if let Some(bytes) = records.get(record_key) {
                for tag in decode_tag_list(bytes) {
                    push_member(&mut to_remove, &tag, key);
                }
            }
        }
        if !to_remove.is_empty() {
            self.index.remove_keys_from_tags(&to_remove).await;
        }

        let targets: Vec<String> = keys.iter().cloned().chain(record_keys).collect();
        let results = settle(
            "delete_multi",
            KeyCount(targets.len()),
            self.backend.delete_multi(&targets).await,
        );
        keys.iter()
            .map(|k| (k.clone(), results.get(k).copied().unwrap_or(false)))
            .collect()
    }

    /// Flush the backend and drop all pool state.
    pub async fn clear(&mut self) -> bool {
        self.deferred.clear();
        self.previous_tags.clear();
        self.repository.clear();
        settle("flush", "*", self.backend.flush().await)
    }
}

impl<B: ?Sized, V> Drop for TaggablePool<B, V> {
    fn drop(&mut self) {
        if !self.deferred.is_empty() {
            tracing::warn!(
                pending = self.deferred.len(),
                "pool dropped with uncommitted deferred writes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KeyValueBackend, MemoryBackend, TagSetBackend};
    use tagcache_core::tags;

    fn pool() -> (TaggablePool<MemoryBackend, String>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (TaggablePool::new(Arc::clone(&backend)), backend)
    }

    async fn members(backend: &MemoryBackend, tag: &str) -> Vec<String> {
        let mut keys = backend
            .s_members(&format!("[tag]{tag}"))
            .await
            .expect("s_members should succeed");
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_deferred_writes_commit_together() {
        let (mut pool, backend) = pool();
        for (key, tag_names) in [("a", vec!["x", "y"]), ("b", vec!["y"])] {
            let item = pool.get_item(key).await.expect("get should succeed");
            assert!(!item.is_hit());
            let item = item.set(format!("{key}-value")).set_tags(&tags(tag_names));
            assert!(pool.save_deferred(item.into()).await.expect("save should succeed"));
        }
        assert_eq!(pool.pending(), 2);
        assert_eq!(backend.get("a").await.expect("get should succeed"), None);

        let pending = pool.get_item("a").await.expect("get should succeed");
        assert!(pending.is_hit());
        assert_eq!(pending.get(), Some(&"a-value".to_string()));

        assert!(pool.commit().await);
        assert_eq!(pool.pending(), 0);
        assert_eq!(members(&backend, "x").await, vec!["a".to_string()]);
        assert_eq!(members(&backend, "y").await, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            decode_tag_list(
                &backend
                    .get("[tags]a")
                    .await
                    .expect("get should succeed")
                    .expect("record should exist")
            ),
            tags(["x", "y"])
        );
    }

    #[tokio::test]
    async fn test_retag_through_pool() {
        let (mut pool, backend) = pool();
        let item = pool.get_item("foo").await.expect("get should succeed");
        pool.save(item.set("bar".into()).set_tags(&tags(["lorem", "ipsum"])).into())
            .await
            .expect("save should succeed");

        let item = pool.get_item("foo").await.expect("get should succeed");
        assert_eq!(pool.current_tags(&item).await, tags(["lorem", "ipsum"]));
        pool.save_deferred(item.set("baz".into()).set_tags(&tags(["lorem"])).into())
            .await
            .expect("save should succeed");
        assert!(pool.commit().await);

        assert_eq!(members(&backend, "lorem").await, vec!["foo".to_string()]);
        assert!(members(&backend, "ipsum").await.is_empty());

        assert!(pool.invalidate_tags(&tags(["ipsum"])).await.is_empty());
        assert!(pool.has_item("foo").await.expect("lookup should succeed"));
        let result = pool.invalidate_tags(&tags(["lorem"])).await;
        assert_eq!(result.get("foo"), Some(&true));
        assert!(!pool.has_item("foo").await.expect("lookup should succeed"));
        assert_eq!(backend.get("[tags]foo").await.expect("get should succeed"), None);
    }

    #[tokio::test]
    async fn test_commit_releases_tag_lookups() {
        let (mut pool, _) = pool();
        for round in 0..100 {
            let item = pool.get_item("k").await.expect("get should succeed");
            pool.save_deferred(item.set(format!("v{round}")).set_tags(&tags(["t"])).into())
                .await
                .expect("save should succeed");
            assert!(pool.commit().await);
        }
        assert_eq!(pool.repository.pending(), 0);
        assert!(pool.repository.is_empty());

        let item = pool.get_item("k").await.expect("get should succeed");
        assert_eq!(pool.repository.len(), 1);
        assert_eq!(pool.current_tags(&item).await, tags(["t"]));

        // an item from before the commit no longer resolves
        pool.save_deferred(item.clone().set("w".into()).into())
            .await
            .expect("save should succeed");
        assert!(pool.commit().await);
        assert!(pool.current_tags(&item).await.is_empty());
        assert!(pool.repository.is_empty());
    }

    #[tokio::test]
    async fn test_save_releases_tag_lookups_for_its_key() {
        let (mut pool, _) = pool();
        let kept = pool.get_item("other").await.expect("get should succeed");
        let item = pool.get_item("k").await.expect("get should succeed");
        pool.save(item.set("v".into()).into())
            .await
            .expect("save should succeed");

        assert_eq!(pool.repository.len(), 1);
        assert!(pool.repository.exists(&kept.handle()));
    }

    #[tokio::test]
    async fn test_current_tags_of_miss_is_empty() {
        let (mut pool, _) = pool();
        let item = pool.get_item("nothing").await.expect("get should succeed");
        assert!(pool.current_tags(&item).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_items_preserves_order() {
        let (mut pool, _) = pool();
        pool.save(PoolWrite::Plain {
            key: "b".to_string(),
            value: "B".to_string(),
            expiry: Expiry::Never,
        })
        .await
        .expect("save should succeed");

        let items = pool
            .get_items(&["a".to_string(), "b".to_string()])
            .await
            .expect("get should succeed");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key(), "a");
        assert!(!items[0].is_hit());
        assert_eq!(items[1].get(), Some(&"B".to_string()));
    }

    #[tokio::test]
    async fn test_delete_items_purges_pending_writes() {
        let (mut pool, backend) = pool();
        let item = pool.get_item("k").await.expect("get should succeed");
        pool.save(item.set("v".into()).set_tags(&tags(["t"])).into())
            .await
            .expect("save should succeed");

        let item = pool.get_item("k").await.expect("get should succeed");
        pool.save_deferred(item.set("w".into()).set_tags(&tags(["u"])).into())
            .await
            .expect("save should succeed");

        assert!(pool.delete_item("k").await.expect("delete should succeed"));
        assert_eq!(pool.pending(), 0);
        assert!(members(&backend, "t").await.is_empty());
        assert!(pool.commit().await);
        assert_eq!(backend.get("k").await.expect("get should succeed"), None);
        assert!(members(&backend, "u").await.is_empty());
    }

    #[tokio::test]
    async fn test_item_without_value_is_not_saved() {
        let (mut pool, _) = pool();
        let item = pool.get_item("empty").await.expect("get should succeed");
        assert!(!pool.save(item.clone().into()).await.expect("save should succeed"));
        assert!(!pool.save_deferred(item.into()).await.expect("save should succeed"));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let (mut pool, backend) = pool();
        pool.save(PoolWrite::Plain {
            key: "a".to_string(),
            value: "1".to_string(),
            expiry: Expiry::Never,
        })
        .await
        .expect("save should succeed");
        let item = pool.get_item("b").await.expect("get should succeed");
        pool.save_deferred(item.set("2".into()).into())
            .await
            .expect("save should succeed");

        assert!(pool.clear().await);
        assert_eq!(pool.pending(), 0);
        assert_eq!(backend.get("a").await.expect("get should succeed"), None);
    }

    #[tokio::test]
    async fn test_from_config_sets_item_expiry() {
        let config = TagCacheConfig::new().with_default_ttl_secs(90);
        let mut pool: TaggablePool<MemoryBackend, String> =
            TaggablePool::from_config(Arc::new(MemoryBackend::new()), &config)
                .expect("pool should build");
        let item = pool.get_item("k").await.expect("get should succeed");
        assert_eq!(item.expiry(), Expiry::from_secs(90));
        assert_eq!(item.expires_never().expiry(), Expiry::Never);
    }
}
