//! Reserved key-space layout for index records.
//!
//! The tag index shares the backend with ordinary cache entries, so index
//! records live under reserved prefixes:
//!
//! - `[tag]<name>`  → set of member keys for one tag
//! - `[tags]<key>`  → the tag list currently attached to one key
//!
//! Caller keys starting with either prefix are rejected, which keeps the
//! three key spaces disjoint.

use crate::error::ValidationError;
use crate::tag::Tag;

/// Default prefix for tag-set records.
pub const TAG_PREFIX: &str = "[tag]";

/// Default prefix for per-key tag-membership records.
pub const KEY_TAGS_PREFIX: &str = "[tags]";

/// Key layout for index records.
///
/// Construct with [`KeyNamespace::default`] for the standard prefixes, or via
/// [`crate::TagCacheConfig::namespace`] for validated custom ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyNamespace {
    tag_prefix: String,
    key_tags_prefix: String,
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self {
            tag_prefix: TAG_PREFIX.to_string(),
            key_tags_prefix: KEY_TAGS_PREFIX.to_string(),
        }
    }
}

impl KeyNamespace {
    /// Crate-visible: prefixes must go through config validation first.
    pub(crate) fn new(tag_prefix: String, key_tags_prefix: String) -> Self {
        Self {
            tag_prefix,
            key_tags_prefix,
        }
    }

    pub fn tag_prefix(&self) -> &str {
        &self.tag_prefix
    }

    pub fn key_tags_prefix(&self) -> &str {
        &self.key_tags_prefix
    }

    /// Backend key of the member set for `tag`.
    pub fn tag_key(&self, tag: &Tag) -> String {
        format!("{}{}", self.tag_prefix, tag)
    }

    /// Backend key of the tag-membership record for cache key `key`.
    pub fn key_tags_key(&self, key: &str) -> String {
        format!("{}{}", self.key_tags_prefix, key)
    }

    /// Recover the tag from a tag-set record key.
    ///
    /// Returns `None` for keys outside the tag-set key space.
    pub fn tag_from_key(&self, set_key: &str) -> Option<Tag> {
        if self.is_key_tags_key(set_key) {
            return None;
        }
        set_key.strip_prefix(&self.tag_prefix).map(Tag::from)
    }

    /// Recover the cache key from a tag-membership record key.
    pub fn key_from_key_tags_key<'a>(&self, record_key: &'a str) -> Option<&'a str> {
        record_key.strip_prefix(&self.key_tags_prefix)
    }

    fn is_key_tags_key(&self, key: &str) -> bool {
        key.starts_with(&self.key_tags_prefix)
    }

    /// Reject keys that are empty or collide with an index key space.
    pub fn validate_key(&self, key: &str) -> Result<(), ValidationError> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        for prefix in [&self.tag_prefix, &self.key_tags_prefix] {
            if key.starts_with(prefix.as_str()) {
                return Err(ValidationError::ReservedKey {
                    key: key.to_string(),
                    prefix: prefix.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate every key in a batch, failing on the first bad one.
    pub fn validate_keys<'a, I>(&self, keys: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter().try_for_each(|k| self.validate_key(k))
    }
}
