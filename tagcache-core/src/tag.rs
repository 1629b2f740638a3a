//! Tags and tag-membership diffing.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// An opaque label attached to zero or more cache entries.
///
/// Tags carry no structure of their own: no hierarchy, no wildcards. Two tags
/// are the same tag if and only if their strings are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Build a tag list from anything string-like.
pub fn tags<I, S>(names: I) -> Vec<Tag>
where
    I: IntoIterator<Item = S>,
    S: Into<Tag>,
{
    names.into_iter().map(Into::into).collect()
}

/// Remove duplicate tags, keeping the first occurrence of each.
pub fn dedup_tags<'a, I>(tags: I) -> Vec<Tag>
where
    I: IntoIterator<Item = &'a Tag>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

/// Tag → member keys, grouped by tag. Used to consolidate index mutations
/// across a multi-key operation into one call per tag.
pub type TagKeyMap = BTreeMap<Tag, Vec<String>>;

/// Append `key` to the member list of `tag`, skipping it if already present.
pub fn push_member(map: &mut TagKeyMap, tag: &Tag, key: &str) {
    let members = map.entry(tag.clone()).or_default();
    if !members.iter().any(|m| m == key) {
        members.push(key.to_string());
    }
}

/// The membership change for one key moving from an old tag set to a new one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagDiff {
    /// Tags the key had and no longer has (`old − new`).
    pub removed: Vec<Tag>,
    /// The full new tag set, de-duplicated. Re-adding an existing member is
    /// harmless, so the whole set is (re)asserted rather than only `new − old`.
    pub current: Vec<Tag>,
}

impl TagDiff {
    /// Compute the diff. Order follows the input lists; duplicates collapse.
    pub fn between(old: &[Tag], new: &[Tag]) -> Self {
        let current = dedup_tags(new);
        let keep: HashSet<&str> = current.iter().map(Tag::as_str).collect();
        let removed = dedup_tags(old.iter().filter(|t| !keep.contains(t.as_str())));
        Self { removed, current }
    }

    /// Tags that are new to the key (`new − old`).
    pub fn added(&self, old: &[Tag]) -> Vec<Tag> {
        let had: HashSet<&str> = old.iter().map(Tag::as_str).collect();
        self.current
            .iter()
            .filter(|t| !had.contains(t.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.current.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_diff_removes_dropped_tags_only() {
        let diff = TagDiff::between(&tags(["lorem", "ipsum"]), &tags(["lorem"]));
        assert_eq!(diff.removed, tags(["ipsum"]));
        assert_eq!(diff.current, tags(["lorem"]));
    }

    #[test]
    fn test_diff_from_nothing() {
        let diff = TagDiff::between(&[], &tags(["a", "b", "a"]));
        assert!(diff.removed.is_empty());
        assert_eq!(diff.current, tags(["a", "b"]));
        assert_eq!(diff.added(&[]), tags(["a", "b"]));
    }

    #[test]
    fn test_diff_to_nothing() {
        let diff = TagDiff::between(&tags(["a", "b"]), &[]);
        assert_eq!(diff.removed, tags(["a", "b"]));
        assert!(diff.current.is_empty());
        assert!(!diff.is_noop());
        assert!(TagDiff::between(&[], &[]).is_noop());
    }

    #[test]
    fn test_push_member_is_idempotent() {
        let mut map = TagKeyMap::new();
        let t1 = Tag::from("t1");
        push_member(&mut map, &t1, "k1");
        push_member(&mut map, &t1, "k2");
        push_member(&mut map, &t1, "k1");
        assert_eq!(map[&t1], vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn test_tag_serializes_as_plain_string() {
        let json = serde_json::to_string(&tags(["a", "b"])).expect("serialize should succeed");
        assert_eq!(json, r#"["a","b"]"#);
    }

    fn tag_list() -> impl Strategy<Value = Vec<Tag>> {
        prop::collection::vec("[a-e]", 0..6).prop_map(|names| tags(names))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Removed tags are exactly the old tags absent from the new set,
        /// and nothing unchanged between the two sets is removed.
        #[test]
        fn prop_removed_is_set_difference(old in tag_list(), new in tag_list()) {
            let diff = TagDiff::between(&old, &new);
            for t in &diff.removed {
                prop_assert!(old.contains(t));
                prop_assert!(!new.contains(t));
            }
            for t in &old {
                if !new.contains(t) {
                    prop_assert!(diff.removed.contains(t));
                }
            }
        }

        /// Neither side of the diff contains duplicates.
        #[test]
        fn prop_diff_has_no_duplicates(old in tag_list(), new in tag_list()) {
            let diff = TagDiff::between(&old, &new);
            let removed: HashSet<_> = diff.removed.iter().collect();
            let current: HashSet<_> = diff.current.iter().collect();
            prop_assert_eq!(removed.len(), diff.removed.len());
            prop_assert_eq!(current.len(), diff.current.len());
        }
    }
}
