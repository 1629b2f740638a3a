//! Reverse index from tag to member keys.
//!
//! [`TagIndexAdapter`] translates index mutations into set primitives on a
//! [`TagSetBackend`]. It holds no state beyond the key layout and makes no
//! decisions about *which* tags change; callers compute the diff.
//!
//! Mutations are best-effort per tag: a failed `s_add`/`s_rem` is logged and
//! the remaining tags are still attempted. Lookups return `Err` so the caller
//! can decide whether a partial view is acceptable.

use std::collections::HashSet;
use std::sync::Arc;

use tagcache_core::{dedup_tags, KeyNamespace, Tag, TagCacheResult, TagKeyMap};

use crate::backend::TagSetBackend;

/// Set-primitive adapter for the tag index.
pub struct TagIndexAdapter<B: ?Sized> {
    backend: Arc<B>,
    namespace: KeyNamespace,
}

impl<B: ?Sized> Clone for TagIndexAdapter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            namespace: self.namespace.clone(),
        }
    }
}

impl<B: TagSetBackend + ?Sized> TagIndexAdapter<B> {
    pub fn new(backend: Arc<B>, namespace: KeyNamespace) -> Self {
        Self { backend, namespace }
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    /// Add `key` to each tag's member set. Returns how many memberships were new.
    pub async fn add_key_to_tags(&self, key: &str, tags: &[Tag]) -> usize {
        let member = [key.to_string()];
        let mut added = 0;
        for tag in tags {
            added += self.s_add(tag, &member).await;
        }
        added
    }

    /// Add several keys per tag, one backend call per tag.
    pub async fn add_keys_to_tags(&self, tag_to_keys: &TagKeyMap) -> usize {
        let mut added = 0;
        for (tag, keys) in tag_to_keys.iter().filter(|(_, keys)| !keys.is_empty()) {
            added += self.s_add(tag, keys).await;
        }
        if added > 0 {
            tracing::debug!(tags = tag_to_keys.len(), added, "added keys to tags");
        }
        added
    }

    /// Remove `key` from each tag's member set. Absent members are ignored.
    pub async fn remove_key_from_tags(&self, key: &str, tags: &[Tag]) -> usize {
        let member = [key.to_string()];
        let mut removed = 0;
        for tag in tags {
            removed += self.s_rem(tag, &member).await;
        }
        removed
    }

    /// Remove several keys per tag, one backend call per tag.
    pub async fn remove_keys_from_tags(&self, tag_to_keys: &TagKeyMap) -> usize {
        let mut removed = 0;
        for (tag, keys) in tag_to_keys.iter().filter(|(_, keys)| !keys.is_empty()) {
            removed += self.s_rem(tag, keys).await;
        }
        if removed > 0 {
            tracing::debug!(tags = tag_to_keys.len(), removed, "removed keys from tags");
        }
        removed
    }

    /// Union of member keys across `tags`, without duplicates.
    ///
    /// Order follows the tag order, then each set's member order.
    pub async fn get_tags_cache_keys(&self, tags: &[Tag]) -> TagCacheResult<Vec<String>> {
        let by_tag = self.members_by_tag(tags).await?;
        Ok(union_members(tags, &by_tag))
    }

    /// Member lists of `tags` in one backend round trip. Every requested tag
    /// is present in the result.
    pub async fn members_by_tag(&self, tags: &[Tag]) -> TagCacheResult<TagKeyMap> {
        if tags.is_empty() {
            return Ok(TagKeyMap::new());
        }
        let tags = dedup_tags(tags);
        let set_keys: Vec<String> = tags.iter().map(|t| self.namespace.tag_key(t)).collect();
        let mut members = self.backend.s_members_multi(&set_keys).await?;

        Ok(tags
            .into_iter()
            .zip(&set_keys)
            .map(|(tag, set_key)| (tag, members.remove(set_key).unwrap_or_default()))
            .collect())
    }

    async fn s_add(&self, tag: &Tag, keys: &[String]) -> usize {
        match self.backend.s_add(&self.namespace.tag_key(tag), keys).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(
                    tag = %tag,
                    keys = keys.len(),
                    error = %e,
                    "failed to add keys to tag"
                );
                0
            }
        }
    }

    async fn s_rem(&self, tag: &Tag, keys: &[String]) -> usize {
        match self.backend.s_rem(&self.namespace.tag_key(tag), keys).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(
                    tag = %tag,
                    keys = keys.len(),
                    error = %e,
                    "failed to remove keys from tag"
                );
                0
            }
        }
    }
}

/// Member keys of `tags` in `by_tag`, first occurrence kept.
pub(crate) fn union_members(tags: &[Tag], by_tag: &TagKeyMap) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for tag in tags {
        for key in by_tag.get(tag).into_iter().flatten() {
            if seen.insert(key.as_str()) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use tagcache_core::{push_member, tags};

    fn adapter() -> TagIndexAdapter<MemoryBackend> {
        TagIndexAdapter::new(Arc::new(MemoryBackend::new()), KeyNamespace::default())
    }

    #[tokio::test]
    async fn test_add_keys_to_tags_example() {
        let index = adapter();
        let mut map = TagKeyMap::new();
        push_member(&mut map, &Tag::from("t1"), "k1");
        push_member(&mut map, &Tag::from("t1"), "k2");
        push_member(&mut map, &Tag::from("t2"), "k1");

        assert_eq!(index.add_keys_to_tags(&map).await, 3);

        let mut keys = index
            .get_tags_cache_keys(&tags(["t1", "t2"]))
            .await
            .expect("lookup should succeed");
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[tokio::test]
    async fn test_re_adding_is_idempotent() {
        let index = adapter();
        assert_eq!(index.add_key_to_tags("k", &tags(["a", "b"])).await, 2);
        assert_eq!(index.add_key_to_tags("k", &tags(["a", "b"])).await, 0);

        let members = index
            .members_by_tag(&tags(["a"]))
            .await
            .expect("lookup should succeed");
        assert_eq!(members[&Tag::from("a")], vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_absent_member_is_noop() {
        let index = adapter();
        index.add_key_to_tags("k", &tags(["a"])).await;

        assert_eq!(index.remove_key_from_tags("other", &tags(["a", "zzz"])).await, 0);
        assert_eq!(index.remove_key_from_tags("k", &tags(["a"])).await, 1);
        assert!(index
            .get_tags_cache_keys(&tags(["a"]))
            .await
            .expect("lookup should succeed")
            .is_empty());
    }

    #[tokio::test]
    async fn test_members_by_tag_reports_every_tag() {
        let index = adapter();
        index.add_key_to_tags("k", &tags(["a"])).await;

        let members = index
            .members_by_tag(&tags(["a", "empty"]))
            .await
            .expect("lookup should succeed");
        assert_eq!(members.len(), 2);
        assert!(members[&Tag::from("empty")].is_empty());
    }

    #[tokio::test]
    async fn test_empty_inputs_short_circuit() {
        let index = adapter();
        assert_eq!(index.add_key_to_tags("k", &[]).await, 0);
        assert_eq!(index.remove_keys_from_tags(&TagKeyMap::new()).await, 0);
        assert!(index
            .get_tags_cache_keys(&[])
            .await
            .expect("lookup should succeed")
            .is_empty());
    }
}
