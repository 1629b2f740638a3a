//! The `{ value, tags }` envelope stored in place of raw values.

use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// A value together with the tags attached to it.
///
/// Immutable once built: [`CacheEntry::with_tags`] and [`CacheEntry::map`]
/// produce new entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    value: T,
    tags: Vec<Tag>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, tags: Vec<Tag>) -> Self {
        Self { value, tags }
    }

    /// An entry with no tags.
    pub fn untagged(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn into_parts(self) -> (T, Vec<Tag>) {
        (self.value, self.tags)
    }

    pub fn with_tags(self, tags: Vec<Tag>) -> Self {
        Self::new(self.value, tags)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry::new(f(self.value), self.tags)
    }
}

/// A decoded backend record: either an envelope or a plain value written by
/// something other than this layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue<T> {
    Tagged(CacheEntry<T>),
    Plain(T),
}

impl<T> StoredValue<T> {
    /// Tags of the record. Plain values have none.
    pub fn tags(&self) -> &[Tag] {
        match self {
            Self::Tagged(entry) => entry.tags(),
            Self::Plain(_) => &[],
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Tagged(entry) => entry.value(),
            Self::Plain(value) => value,
        }
    }

    /// Strip the envelope.
    pub fn into_value(self) -> T {
        match self {
            Self::Tagged(entry) => entry.into_value(),
            Self::Plain(value) => value,
        }
    }

    /// View as an envelope; a plain value becomes an untagged entry.
    pub fn into_entry(self) -> CacheEntry<T> {
        match self {
            Self::Tagged(entry) => entry,
            Self::Plain(value) => CacheEntry::untagged(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::tags;

    #[test]
    fn test_entry_accessors() {
        let entry = CacheEntry::new("v".to_string(), tags(["a"]));
        assert!(entry.is_tagged());
        assert_eq!(entry.value(), "v");
        assert_eq!(entry.tags(), tags(["a"]).as_slice());

        let retagged = entry.with_tags(Vec::new());
        assert!(!retagged.is_tagged());
    }

    #[test]
    fn test_map_keeps_tags() {
        let entry = CacheEntry::new(2, tags(["n"])).map(|v| v * 10);
        assert_eq!(entry.into_parts(), (20, tags(["n"])));
    }

    #[test]
    fn test_plain_value_has_no_tags() {
        let stored = StoredValue::Plain(5);
        assert!(stored.tags().is_empty());
        assert_eq!(*stored.value(), 5);
        assert_eq!(stored.into_entry(), CacheEntry::untagged(5));
    }
}
