//! In-memory backend.
//!
//! A process-local map of byte records plus a map of string sets, guarded by
//! one `RwLock`. Expired records are invisible to reads and are dropped
//! lazily on the next write that touches them.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tagcache_core::{BackendError, CasToken, Expiry, TagCacheResult};

use super::{
    BatchBackend, CacheStats, KeyValueBackend, ResultMap, TagSetBackend, ValueMap, WriteBatch,
};

#[derive(Debug, Clone)]
struct Record {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Record {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Record>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl MemoryState {
    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<&Record> {
        self.values.get(key).filter(|r| r.is_live(now))
    }

    fn contains_live(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.live(key, now).is_some()
    }
}

/// In-memory backend for tests and single-process use.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tagcache_storage::{MemoryBackend, TaggableStore};
///
/// let store = TaggableStore::new(Arc::new(MemoryBackend::new()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    next_version: AtomicU64,
    stats: Arc<RwLock<CacheStats>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of non-empty sets currently stored.
    pub fn set_count(&self) -> usize {
        self.state.read().map(|s| s.sets.len()).unwrap_or(0)
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record(&self, value: Vec<u8>, expiry: Expiry, now: DateTime<Utc>) -> Record {
        Record {
            value,
            expires_at: expiry.deadline(now),
            version: self.bump_version(),
        }
    }

    fn record_read(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    fn sync_entry_count(&self, state: &MemoryState) {
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = state.values.len() as u64;
        }
    }

    fn read_state(&self) -> TagCacheResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| BackendError::LockPoisoned.into())
    }

    fn write_state(&self) -> TagCacheResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| BackendError::LockPoisoned.into())
    }

    /// Write under an already-held lock. Expired records are replaced.
    fn put(
        &self,
        state: &mut MemoryState,
        key: &str,
        value: Vec<u8>,
        expiry: Expiry,
        now: DateTime<Utc>,
    ) {
        let record = self.record(value, expiry, now);
        state.values.insert(key.to_string(), record);
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> TagCacheResult<Option<Vec<u8>>> {
        let value = {
            let state = self.read_state()?;
            state.live(key, Utc::now()).map(|r| r.value.clone())
        };
        self.record_read(value.is_some());
        Ok(value)
    }

    async fn get_with_token(&self, key: &str) -> TagCacheResult<Option<(Vec<u8>, CasToken)>> {
        let value = {
            let state = self.read_state()?;
            state
                .live(key, Utc::now())
                .map(|r| (r.value.clone(), CasToken::new(r.version)))
        };
        self.record_read(value.is_some());
        Ok(value)
    }

    async fn get_multi(&self, keys: &[String]) -> TagCacheResult<ValueMap> {
        let found: ValueMap = {
            let state = self.read_state()?;
            let now = Utc::now();
            keys.iter()
                .filter_map(|k| state.live(k, now).map(|r| (k.clone(), r.value.clone())))
                .collect()
        };
        for key in keys {
            self.record_read(found.contains_key(key));
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        let mut state = self.write_state()?;
        self.put(&mut state, key, value, expiry, Utc::now());
        self.sync_entry_count(&state);
        Ok(true)
    }

    async fn set_multi(&self, items: ValueMap, expiry: Expiry) -> TagCacheResult<ResultMap> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        let mut results = ResultMap::with_capacity(items.len());
        for (key, value) in items {
            self.put(&mut state, &key, value, expiry, now);
            results.insert(key, true);
        }
        self.sync_entry_count(&state);
        Ok(results)
    }

    async fn delete(&self, key: &str) -> TagCacheResult<bool> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        let existed = state
            .values
            .remove(key)
            .map_or(false, |r| r.is_live(now));
        self.sync_entry_count(&state);
        Ok(existed)
    }

    async fn delete_multi(&self, keys: &[String]) -> TagCacheResult<ResultMap> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        let mut results = ResultMap::with_capacity(keys.len());
        for key in keys {
            let existed = state.values.remove(key).is_some_and(|r| r.is_live(now));
            // a repeated key stays `true` once deleted
            *results.entry(key.clone()).or_insert(false) |= existed;
        }
        self.sync_entry_count(&state);
        Ok(results)
    }

    async fn add(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        if state.contains_live(key, now) {
            return Ok(false);
        }
        self.put(&mut state, key, value, expiry, now);
        self.sync_entry_count(&state);
        Ok(true)
    }

    async fn replace(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        if !state.contains_live(key, now) {
            return Ok(false);
        }
        self.put(&mut state, key, value, expiry, now);
        Ok(true)
    }

    async fn cas(
        &self,
        token: CasToken,
        key: &str,
        value: Vec<u8>,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        match state.live(key, now) {
            Some(current) if current.version == token.version() => {
                self.put(&mut state, key, value, expiry, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, key: &str, expiry: Expiry) -> TagCacheResult<bool> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        match state.values.get_mut(key) {
            Some(record) if record.is_live(now) => {
                record.expires_at = expiry.deadline(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn flush(&self) -> TagCacheResult<bool> {
        let mut state = self.write_state()?;
        state.values.clear();
        state.sets.clear();
        self.sync_entry_count(&state);
        Ok(true)
    }
}

#[async_trait]
impl TagSetBackend for MemoryBackend {
    async fn s_add(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut state = self.write_state()?;
        let set = state.sets.entry(set_key.to_string()).or_default();
        Ok(members.iter().filter(|m| set.insert((*m).clone())).count())
    }

    async fn s_rem(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        let mut state = self.write_state()?;
        let Some(set) = state.sets.get_mut(set_key) else {
            return Ok(0);
        };
        let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
        if set.is_empty() {
            state.sets.remove(set_key);
        }
        Ok(removed)
    }

    async fn s_members(&self, set_key: &str) -> TagCacheResult<Vec<String>> {
        let state = self.read_state()?;
        Ok(state
            .sets
            .get(set_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn s_members_multi(
        &self,
        set_keys: &[String],
    ) -> TagCacheResult<HashMap<String, Vec<String>>> {
        let state = self.read_state()?;
        Ok(set_keys
            .iter()
            .map(|k| {
                let members = state
                    .sets
                    .get(k)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                (k.clone(), members)
            })
            .collect())
    }
}

#[async_trait]
impl BatchBackend for MemoryBackend {
    async fn apply(&self, batch: WriteBatch) -> TagCacheResult<ResultMap> {
        let (values, sets) = batch.into_parts();
        let mut state = self.write_state()?;
        let now = Utc::now();
        let mut results = ResultMap::with_capacity(values.len() + sets.len());

        for (key, (value, expiry)) in values {
            self.put(&mut state, &key, value, expiry, now);
            results.insert(key, true);
        }
        for (set_key, members) in sets {
            if members.is_empty() {
                state.sets.remove(&set_key);
            } else {
                state
                    .sets
                    .insert(set_key.clone(), members.into_iter().collect());
            }
            results.insert(set_key, true);
        }

        self.sync_entry_count(&state);
        Ok(results)
    }
}
