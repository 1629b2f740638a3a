//! Tagcache Core - Data Types
//!
//! Pure data types shared by every tagcache crate: tags and tag diffs, the
//! `{ value, tags }` envelope and its byte codec, the reserved key namespace
//! for index records, expiry and CAS tokens, errors, and configuration.
//! No backend I/O lives here.

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod expiry;
pub mod namespace;
pub mod tag;

pub use codec::{
    decode_entry, decode_tag_list, decode_tags, encode_entry, encode_plain, encode_tag_list,
    ENVELOPE_MAGIC,
};
pub use config::{LmdbConfig, TagCacheConfig};
pub use entry::{CacheEntry, StoredValue};
pub use error::{
    BackendError, CodecError, ConfigError, TagCacheError, TagCacheResult, ValidationError,
};
pub use expiry::{CasToken, Expiry};
pub use namespace::{KeyNamespace, KEY_TAGS_PREFIX, TAG_PREFIX};
pub use tag::{dedup_tags, push_member, tags, Tag, TagDiff, TagKeyMap};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque per-item handle used by pools to track items between lookups.
///
/// UUIDv7, so handles sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemHandle(Uuid);

impl ItemHandle {
    /// Generate a fresh handle.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ItemHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
