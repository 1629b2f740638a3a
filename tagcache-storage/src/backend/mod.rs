//! Backend traits for pluggable key-value stores.
//!
//! The tag index needs three capabilities from a backend:
//!
//! - [`KeyValueBackend`]: plain get/set/delete over byte records
//! - [`TagSetBackend`]: set primitives equivalent to `SADD`/`SREM`/`SMEMBERS`
//! - [`BatchBackend`]: one round trip applying value writes and whole-set
//!   replacements together, used by the deferred commit path
//!
//! Backends know nothing about envelopes or tags; they move bytes and strings.

pub mod lmdb;
pub mod memory;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tagcache_core::{CasToken, Expiry, TagCacheResult};

pub use lmdb::{LmdbBackend, LmdbBackendError};
pub use memory::MemoryBackend;

/// Records returned by multi-key reads, keyed by backend key. Missing keys are
/// simply absent.
pub type ValueMap = HashMap<String, Vec<u8>>;

/// Per-key success flags returned by multi-key writes.
pub type ResultMap = HashMap<String, bool>;

/// Key-value backend over byte records.
///
/// Implementations should be thread-safe and support concurrent access. An
/// `Err` means the backend could not be reached or the call failed as a
/// whole; a `false` result means the call ran but did not apply (missing key,
/// failed precondition, ...).
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Get a record, or `None` if absent or expired.
    async fn get(&self, key: &str) -> TagCacheResult<Option<Vec<u8>>>;

    /// Get a record together with its CAS token.
    async fn get_with_token(&self, key: &str) -> TagCacheResult<Option<(Vec<u8>, CasToken)>>;

    /// Get several records in one round trip.
    async fn get_multi(&self, keys: &[String]) -> TagCacheResult<ValueMap>;

    /// Store a record unconditionally.
    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool>;

    /// Store several records in one round trip, all with the same expiry.
    async fn set_multi(&self, items: ValueMap, expiry: Expiry) -> TagCacheResult<ResultMap>;

    /// Delete a record. `false` if it did not exist.
    async fn delete(&self, key: &str) -> TagCacheResult<bool>;

    /// Delete several records in one round trip.
    async fn delete_multi(&self, keys: &[String]) -> TagCacheResult<ResultMap>;

    /// Store only if the key does not exist yet.
    async fn add(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool>;

    /// Store only if the key already exists.
    async fn replace(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool>;

    /// Store only if the record is unchanged since `token` was handed out.
    async fn cas(
        &self,
        token: CasToken,
        key: &str,
        value: Vec<u8>,
        expiry: Expiry,
    ) -> TagCacheResult<bool>;

    /// Reset the expiry of an existing record.
    async fn touch(&self, key: &str, expiry: Expiry) -> TagCacheResult<bool>;

    /// Drop every record, including set records.
    async fn flush(&self) -> TagCacheResult<bool>;
}

/// Set primitives used by the tag index.
///
/// Sets live in their own key space inside the backend; an empty set is the
/// same as an absent one.
#[async_trait]
pub trait TagSetBackend: Send + Sync {
    /// Add members to a set, creating it if needed. Returns how many were new.
    async fn s_add(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize>;

    /// Remove members from a set. Absent members are ignored. Returns how many
    /// were actually removed.
    async fn s_rem(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize>;

    /// All members of a set, in no particular order.
    async fn s_members(&self, set_key: &str) -> TagCacheResult<Vec<String>>;

    /// Members of several sets in one round trip. Every requested key is
    /// present in the result; absent sets map to an empty list.
    async fn s_members_multi(
        &self,
        set_keys: &[String],
    ) -> TagCacheResult<HashMap<String, Vec<String>>>;
}

/// Backends that can apply a [`WriteBatch`] in one round trip.
#[async_trait]
pub trait BatchBackend: KeyValueBackend + TagSetBackend {
    /// Apply every value write and set replacement in the batch. The result has
    /// one flag per value key and per set key.
    async fn apply(&self, batch: WriteBatch) -> TagCacheResult<ResultMap>;
}

/// Value writes and whole-set replacements committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    values: BTreeMap<String, (Vec<u8>, Expiry)>,
    sets: BTreeMap<String, Vec<String>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a value write. A later write to the same key wins.
    pub fn put_value(&mut self, key: impl Into<String>, value: Vec<u8>, expiry: Expiry) {
        self.values.insert(key.into(), (value, expiry));
    }

    /// Queue a whole-set replacement. An empty member list removes the set.
    pub fn put_set(&mut self, set_key: impl Into<String>, members: Vec<String>) {
        self.sets.insert(set_key.into(), members);
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &(Vec<u8>, Expiry))> {
        self.values.iter()
    }

    pub fn sets(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.sets.iter()
    }

    pub fn into_parts(
        self,
    ) -> (
        BTreeMap<String, (Vec<u8>, Expiry)>,
        BTreeMap<String, Vec<String>>,
    ) {
        (self.values, self.sets)
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.sets.is_empty()
    }
}

/// Statistics about backend usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a record.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of value records currently stored.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
