//! LMDB-backed key-value and set store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped backend for the tag index.
//!
//! # Layout
//!
//! Two named databases live in one environment:
//! - `values`: `[expires_at millis: 8 bytes LE, 0 = never][version: 8 bytes LE][payload]`
//! - `sets`: a JSON array of members, sorted, one record per set key
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Every trait call runs in exactly one
//! transaction, so multi-key calls and [`BatchBackend::apply`] are atomic.
//! Statistics are tracked behind a `RwLock` outside the transaction.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tagcache_core::{BackendError, CasToken, Expiry, LmdbConfig, TagCacheError, TagCacheResult};

use super::{
    BatchBackend, CacheStats, KeyValueBackend, ResultMap, TagSetBackend, ValueMap, WriteBatch,
};

const HEADER_LEN: usize = 16;

/// Error type for LMDB backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A set record could not be (de)serialized.
    #[error("Set record {key} is corrupt: {reason}")]
    CorruptSet { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbBackendError {
    fn from(e: heed::Error) -> Self {
        LmdbBackendError::Transaction(e.to_string())
    }
}

impl From<LmdbBackendError> for TagCacheError {
    fn from(e: LmdbBackendError) -> Self {
        match e {
            LmdbBackendError::Io(io) => BackendError::Io {
                reason: io.to_string(),
            }
            .into(),
            other => BackendError::Transaction {
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

/// A decoded value record borrowed from a transaction.
struct Frame<'t> {
    expires_at: Option<DateTime<Utc>>,
    version: u64,
    payload: &'t [u8],
}

impl Frame<'_> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

fn frame(payload: &[u8], expires_at: Option<DateTime<Utc>>, version: u64) -> Vec<u8> {
    let millis = expires_at.map_or(0, |at| at.timestamp_millis());
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&millis.to_le_bytes());
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Short records are treated as absent.
fn unframe(bytes: &[u8]) -> Option<Frame<'_>> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let millis = i64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let version = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
    let expires_at = if millis == 0 {
        None
    } else {
        Some(DateTime::from_timestamp_millis(millis)?)
    };
    Some(Frame {
        expires_at,
        version,
        payload: &bytes[HEADER_LEN..],
    })
}

/// LMDB-backed implementation of the backend traits.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tagcache_storage::{LmdbBackend, TaggableStore};
///
/// let backend = LmdbBackend::new("/tmp/tagcache", 100)?;
/// let store = TaggableStore::new(Arc::new(backend));
/// ```
pub struct LmdbBackend {
    env: Env,
    values: Database<Str, Bytes>,
    sets: Database<Str, Bytes>,
    next_version: AtomicU64,
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbBackend {
    /// Open (or create) an LMDB environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the environment in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the environment
    /// and its databases cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbBackendError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let values: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("values"))
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        let sets: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("sets"))
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        let entry_count = values.len(&wtxn)?;
        wtxn.commit()?;

        tracing::debug!(
            path = %path.as_ref().display(),
            max_size_mb,
            entry_count,
            "opened lmdb backend"
        );

        // Versions must stay monotonic across reopen, so seed from the clock.
        let seed = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);

        Ok(Self {
            env,
            values,
            sets,
            next_version: AtomicU64::new(seed),
            stats: Arc::new(RwLock::new(CacheStats {
                entry_count,
                ..Default::default()
            })),
        })
    }

    /// Open the environment described by an [`LmdbConfig`].
    pub fn from_config(config: &LmdbConfig) -> Result<Self, LmdbBackendError> {
        Self::new(&config.path, config.max_size_mb)
    }

    /// Get backend statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn sync_entry_count(&self, txn: &RoTxn) {
        if let Ok(count) = self.values.len(txn) {
            if let Ok(mut stats) = self.stats.write() {
                stats.entry_count = count;
            }
        }
    }

    fn live<'t>(
        &self,
        txn: &'t RoTxn,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Frame<'t>>, LmdbBackendError> {
        Ok(self
            .values
            .get(txn, key)?
            .and_then(unframe)
            .filter(|f| f.is_live(now)))
    }

    fn put_value(
        &self,
        wtxn: &mut RwTxn,
        key: &str,
        payload: &[u8],
        expiry: Expiry,
        now: DateTime<Utc>,
    ) -> Result<(), LmdbBackendError> {
        let bytes = frame(payload, expiry.deadline(now), self.bump_version());
        self.values.put(wtxn, key, &bytes)?;
        Ok(())
    }

    /// Delete a value record, reporting whether a live one was there.
    fn delete_value(
        &self,
        wtxn: &mut RwTxn,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, LmdbBackendError> {
        let was_live = self.live(wtxn, key, now)?.is_some();
        self.values.delete(wtxn, key)?;
        Ok(was_live)
    }

    fn read_set(&self, txn: &RoTxn, set_key: &str) -> Result<BTreeSet<String>, LmdbBackendError> {
        match self.sets.get(txn, set_key)? {
            Some(bytes) => {
                serde_json::from_slice(bytes).map_err(|e| LmdbBackendError::CorruptSet {
                    key: set_key.to_string(),
                    reason: e.to_string(),
                })
            }
            None => Ok(BTreeSet::new()),
        }
    }

    fn write_set(
        &self,
        wtxn: &mut RwTxn,
        set_key: &str,
        members: &BTreeSet<String>,
    ) -> Result<(), LmdbBackendError> {
        if members.is_empty() {
            self.sets.delete(wtxn, set_key)?;
            return Ok(());
        }
        let bytes = serde_json::to_vec(members).map_err(|e| LmdbBackendError::CorruptSet {
            key: set_key.to_string(),
            reason: e.to_string(),
        })?;
        self.sets.put(wtxn, set_key, &bytes)?;
        Ok(())
    }

    /// Conditional write shared by `add`, `replace` and `cas`.
    fn put_if<F>(
        &self,
        key: &str,
        value: &[u8],
        expiry: Expiry,
        accept: F,
    ) -> Result<bool, LmdbBackendError>
    where
        F: FnOnce(Option<u64>) -> bool,
    {
        let now = Utc::now();
        let mut wtxn = self.env.write_txn()?;
        let current = self.live(&wtxn, key, now)?.map(|f| f.version);
        if !accept(current) {
            return Ok(false);
        }
        self.put_value(&mut wtxn, key, value, expiry, now)?;
        self.sync_entry_count(&wtxn);
        wtxn.commit()?;
        Ok(true)
    }
}

#[async_trait]
impl KeyValueBackend for LmdbBackend {
    async fn get(&self, key: &str) -> TagCacheResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(LmdbBackendError::from)?;
        let value = self
            .live(&rtxn, key, Utc::now())?
            .map(|f| f.payload.to_vec());
        match value {
            Some(_) => self.record_hit(),
            None => self.record_miss(),
        }
        Ok(value)
    }

    async fn get_with_token(&self, key: &str) -> TagCacheResult<Option<(Vec<u8>, CasToken)>> {
        let rtxn = self.env.read_txn().map_err(LmdbBackendError::from)?;
        let value = self
            .live(&rtxn, key, Utc::now())?
            .map(|f| (f.payload.to_vec(), CasToken::new(f.version)));
        match value {
            Some(_) => self.record_hit(),
            None => self.record_miss(),
        }
        Ok(value)
    }

    async fn get_multi(&self, keys: &[String]) -> TagCacheResult<ValueMap> {
        let rtxn = self.env.read_txn().map_err(LmdbBackendError::from)?;
        let now = Utc::now();
        let mut found = ValueMap::with_capacity(keys.len());
        for key in keys {
            match self.live(&rtxn, key, now)? {
                Some(f) => {
                    self.record_hit();
                    found.insert(key.clone(), f.payload.to_vec());
                }
                None => self.record_miss(),
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        self.put_value(&mut wtxn, key, &value, expiry, Utc::now())?;
        self.sync_entry_count(&wtxn);
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(true)
    }

    async fn set_multi(&self, items: ValueMap, expiry: Expiry) -> TagCacheResult<ResultMap> {
        let now = Utc::now();
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        let mut results = ResultMap::with_capacity(items.len());
        for (key, value) in items {
            self.put_value(&mut wtxn, &key, &value, expiry, now)?;
            results.insert(key, true);
        }
        self.sync_entry_count(&wtxn);
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(results)
    }

    async fn delete(&self, key: &str) -> TagCacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        let existed = self.delete_value(&mut wtxn, key, Utc::now())?;
        self.sync_entry_count(&wtxn);
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(existed)
    }

    async fn delete_multi(&self, keys: &[String]) -> TagCacheResult<ResultMap> {
        let now = Utc::now();
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        let mut results = ResultMap::with_capacity(keys.len());
        for key in keys {
            let existed = self.delete_value(&mut wtxn, key, now)?;
            *results.entry(key.clone()).or_insert(false) |= existed;
        }
        self.sync_entry_count(&wtxn);
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(results)
    }

    async fn add(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        Ok(self.put_if(key, &value, expiry, |current| current.is_none())?)
    }

    async fn replace(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        Ok(self.put_if(key, &value, expiry, |current| current.is_some())?)
    }

    async fn cas(
        &self,
        token: CasToken,
        key: &str,
        value: Vec<u8>,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        Ok(self.put_if(key, &value, expiry, |current| {
            current == Some(token.version())
        })?)
    }

    async fn touch(&self, key: &str, expiry: Expiry) -> TagCacheResult<bool> {
        let now = Utc::now();
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        let Some(current) = self.live(&wtxn, key, now)? else {
            return Ok(false);
        };
        // Copy out before writing; the frame borrows the transaction.
        let bytes = frame(current.payload, expiry.deadline(now), current.version);
        self.values
            .put(&mut wtxn, key, &bytes)
            .map_err(LmdbBackendError::from)?;
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(true)
    }

    async fn flush(&self) -> TagCacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        self.values
            .clear(&mut wtxn)
            .map_err(LmdbBackendError::from)?;
        self.sets.clear(&mut wtxn).map_err(LmdbBackendError::from)?;
        wtxn.commit().map_err(LmdbBackendError::from)?;
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = 0;
        }
        Ok(true)
    }
}

#[async_trait]
impl TagSetBackend for LmdbBackend {
    async fn s_add(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        let mut set = self.read_set(&wtxn, set_key)?;
        let added = members.iter().filter(|m| set.insert((*m).clone())).count();
        if added > 0 {
            self.write_set(&mut wtxn, set_key, &set)?;
        }
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(added)
    }

    async fn s_rem(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        let mut set = self.read_set(&wtxn, set_key)?;
        let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
        if removed > 0 {
            self.write_set(&mut wtxn, set_key, &set)?;
        }
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(removed)
    }

    async fn s_members(&self, set_key: &str) -> TagCacheResult<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(LmdbBackendError::from)?;
        Ok(self.read_set(&rtxn, set_key)?.into_iter().collect())
    }

    async fn s_members_multi(
        &self,
        set_keys: &[String],
    ) -> TagCacheResult<HashMap<String, Vec<String>>> {
        let rtxn = self.env.read_txn().map_err(LmdbBackendError::from)?;
        let mut members = HashMap::with_capacity(set_keys.len());
        for key in set_keys {
            let set = self.read_set(&rtxn, key)?;
            members.insert(key.clone(), set.into_iter().collect());
        }
        Ok(members)
    }
}

#[async_trait]
impl BatchBackend for LmdbBackend {
    async fn apply(&self, batch: WriteBatch) -> TagCacheResult<ResultMap> {
        let (values, sets) = batch.into_parts();
        let now = Utc::now();
        let mut wtxn = self.env.write_txn().map_err(LmdbBackendError::from)?;
        let mut results = ResultMap::with_capacity(values.len() + sets.len());

        for (key, (value, expiry)) in values {
            self.put_value(&mut wtxn, &key, &value, expiry, now)?;
            results.insert(key, true);
        }
        for (set_key, members) in sets {
            let set: BTreeSet<String> = members.into_iter().collect();
            self.write_set(&mut wtxn, &set_key, &set)?;
            results.insert(set_key, true);
        }

        self.sync_entry_count(&wtxn);
        wtxn.commit().map_err(LmdbBackendError::from)?;
        Ok(results)
    }
}
