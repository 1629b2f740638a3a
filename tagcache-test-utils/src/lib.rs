//! Tagcache Test Utilities
//!
//! Shared test infrastructure for the tagcache workspace:
//! - Proptest generators for tags, keys and tagged write plans
//! - Instrumented backends: [`RecordingBackend`] logs every call,
//!   [`FaultyBackend`] fails selected operations
//! - Fixtures for common backend setups

pub use tagcache_core::{
    tags, CasToken, Expiry, KeyNamespace, Tag, TagCacheError, TagCacheResult, TagKeyMap,
};
pub use tagcache_storage::{
    BatchBackend, KeyValueBackend, LmdbBackend, MemoryBackend, ResultMap, TagSetBackend,
    TaggablePool, TaggableStore, ValueMap, WriteBatch,
};

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tagcache_core::BackendError;

// ============================================================================
// BACKEND CALL LOG
// ============================================================================

/// Backend operation kinds, used to filter call logs and to pick faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Get,
    GetWithToken,
    GetMulti,
    Set,
    SetMulti,
    Delete,
    DeleteMulti,
    Add,
    Replace,
    Cas,
    Touch,
    Flush,
    SAdd,
    SRem,
    SMembers,
    SMembersMulti,
    Apply,
}

/// One recorded backend call. Multi-key arguments are sorted so logs compare
/// independently of map iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Get(String),
    GetWithToken(String),
    GetMulti(Vec<String>),
    Set(String),
    SetMulti(Vec<String>),
    Delete(String),
    DeleteMulti(Vec<String>),
    Add(String),
    Replace(String),
    Cas(String),
    Touch(String),
    Flush,
    SAdd { set_key: String, members: Vec<String> },
    SRem { set_key: String, members: Vec<String> },
    SMembers(String),
    SMembersMulti(Vec<String>),
    Apply { values: Vec<String>, sets: Vec<String> },
}

impl BackendCall {
    pub fn op(&self) -> BackendOp {
        match self {
            BackendCall::Get(_) => BackendOp::Get,
            BackendCall::GetWithToken(_) => BackendOp::GetWithToken,
            BackendCall::GetMulti(_) => BackendOp::GetMulti,
            BackendCall::Set(_) => BackendOp::Set,
            BackendCall::SetMulti(_) => BackendOp::SetMulti,
            BackendCall::Delete(_) => BackendOp::Delete,
            BackendCall::DeleteMulti(_) => BackendOp::DeleteMulti,
            BackendCall::Add(_) => BackendOp::Add,
            BackendCall::Replace(_) => BackendOp::Replace,
            BackendCall::Cas(_) => BackendOp::Cas,
            BackendCall::Touch(_) => BackendOp::Touch,
            BackendCall::Flush => BackendOp::Flush,
            BackendCall::SAdd { .. } => BackendOp::SAdd,
            BackendCall::SRem { .. } => BackendOp::SRem,
            BackendCall::SMembers(_) => BackendOp::SMembers,
            BackendCall::SMembersMulti(_) => BackendOp::SMembersMulti,
            BackendCall::Apply { .. } => BackendOp::Apply,
        }
    }
}

fn sorted<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    keys.sort();
    keys
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// RECORDING BACKEND
// ============================================================================

/// Forwards every call to `inner` and records it.
pub struct RecordingBackend<B> {
    inner: B,
    calls: Mutex<Vec<BackendCall>>,
}

impl<B> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    /// Return and forget the recorded calls.
    pub fn take_calls(&self) -> Vec<BackendCall> {
        std::mem::take(&mut *lock(&self.calls))
    }

    /// Recorded calls of one kind.
    pub fn calls_of(&self, op: BackendOp) -> Vec<BackendCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    pub fn count(&self, op: BackendOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op() == op).count()
    }

    fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl<B: KeyValueBackend> KeyValueBackend for RecordingBackend<B> {
    async fn get(&self, key: &str) -> TagCacheResult<Option<Vec<u8>>> {
        self.record(BackendCall::Get(key.to_string()));
        self.inner.get(key).await
    }

    async fn get_with_token(&self, key: &str) -> TagCacheResult<Option<(Vec<u8>, CasToken)>> {
        self.record(BackendCall::GetWithToken(key.to_string()));
        self.inner.get_with_token(key).await
    }

    async fn get_multi(&self, keys: &[String]) -> TagCacheResult<ValueMap> {
        self.record(BackendCall::GetMulti(sorted(keys.iter().cloned())));
        self.inner.get_multi(keys).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        self.record(BackendCall::Set(key.to_string()));
        self.inner.set(key, value, expiry).await
    }

    async fn set_multi(&self, items: ValueMap, expiry: Expiry) -> TagCacheResult<ResultMap> {
        self.record(BackendCall::SetMulti(sorted(items.keys().cloned())));
        self.inner.set_multi(items, expiry).await
    }

    async fn delete(&self, key: &str) -> TagCacheResult<bool> {
        self.record(BackendCall::Delete(key.to_string()));
        self.inner.delete(key).await
    }

    async fn delete_multi(&self, keys: &[String]) -> TagCacheResult<ResultMap> {
        self.record(BackendCall::DeleteMulti(sorted(keys.iter().cloned())));
        self.inner.delete_multi(keys).await
    }

    async fn add(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        self.record(BackendCall::Add(key.to_string()));
        self.inner.add(key, value, expiry).await
    }

    async fn replace(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        self.record(BackendCall::Replace(key.to_string()));
        self.inner.replace(key, value, expiry).await
    }

    async fn cas(
        &self,
        token: CasToken,
        key: &str,
        value: Vec<u8>,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        self.record(BackendCall::Cas(key.to_string()));
        self.inner.cas(token, key, value, expiry).await
    }

    async fn touch(&self, key: &str, expiry: Expiry) -> TagCacheResult<bool> {
        self.record(BackendCall::Touch(key.to_string()));
        self.inner.touch(key, expiry).await
    }

    async fn flush(&self) -> TagCacheResult<bool> {
        self.record(BackendCall::Flush);
        self.inner.flush().await
    }
}

#[async_trait]
impl<B: TagSetBackend> TagSetBackend for RecordingBackend<B> {
    async fn s_add(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        self.record(BackendCall::SAdd {
            set_key: set_key.to_string(),
            members: sorted(members.iter().cloned()),
        });
        self.inner.s_add(set_key, members).await
    }

    async fn s_rem(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        self.record(BackendCall::SRem {
            set_key: set_key.to_string(),
            members: sorted(members.iter().cloned()),
        });
        self.inner.s_rem(set_key, members).await
    }

    async fn s_members(&self, set_key: &str) -> TagCacheResult<Vec<String>> {
        self.record(BackendCall::SMembers(set_key.to_string()));
        self.inner.s_members(set_key).await
    }

    async fn s_members_multi(
        &self,
        set_keys: &[String],
    ) -> TagCacheResult<HashMap<String, Vec<String>>> {
        self.record(BackendCall::SMembersMulti(sorted(set_keys.iter().cloned())));
        self.inner.s_members_multi(set_keys).await
    }
}

#[async_trait]
impl<B: BatchBackend> BatchBackend for RecordingBackend<B> {
    async fn apply(&self, batch: WriteBatch) -> TagCacheResult<ResultMap> {
        self.record(BackendCall::Apply {
            values: sorted(batch.values().map(|(k, _)| k.clone())),
            sets: sorted(batch.sets().map(|(k, _)| k.clone())),
        });
        self.inner.apply(batch).await
    }
}

// ============================================================================
// FAULTY BACKEND
// ============================================================================

/// Forwards to `inner`, except that selected operations fail with
/// [`BackendError::Unavailable`] without reaching it.
pub struct FaultyBackend<B> {
    inner: B,
    failing: Mutex<HashSet<BackendOp>>,
}

impl<B> FaultyBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Start failing `op`.
    pub fn fail(&self, op: BackendOp) {
        lock(&self.failing).insert(op);
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: BackendOp) {
        lock(&self.failing).remove(&op);
    }

    pub fn heal_all(&self) {
        lock(&self.failing).clear();
    }

    fn check(&self, op: BackendOp) -> TagCacheResult<()> {
        if lock(&self.failing).contains(&op) {
            return Err(BackendError::Unavailable {
                reason: format!("injected fault on {op:?}"),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<B: KeyValueBackend> KeyValueBackend for FaultyBackend<B> {
    async fn get(&self, key: &str) -> TagCacheResult<Option<Vec<u8>>> {
        self.check(BackendOp::Get)?;
        self.inner.get(key).await
    }

    async fn get_with_token(&self, key: &str) -> TagCacheResult<Option<(Vec<u8>, CasToken)>> {
        self.check(BackendOp::GetWithToken)?;
        self.inner.get_with_token(key).await
    }

    async fn get_multi(&self, keys: &[String]) -> TagCacheResult<ValueMap> {
        self.check(BackendOp::GetMulti)?;
        self.inner.get_multi(keys).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        self.check(BackendOp::Set)?;
        self.inner.set(key, value, expiry).await
    }

    async fn set_multi(&self, items: ValueMap, expiry: Expiry) -> TagCacheResult<ResultMap> {
        self.check(BackendOp::SetMulti)?;
        self.inner.set_multi(items, expiry).await
    }

    async fn delete(&self, key: &str) -> TagCacheResult<bool> {
        self.check(BackendOp::Delete)?;
        self.inner.delete(key).await
    }

    async fn delete_multi(&self, keys: &[String]) -> TagCacheResult<ResultMap> {
        self.check(BackendOp::DeleteMulti)?;
        self.inner.delete_multi(keys).await
    }

    async fn add(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        self.check(BackendOp::Add)?;
        self.inner.add(key, value, expiry).await
    }

    async fn replace(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> TagCacheResult<bool> {
        self.check(BackendOp::Replace)?;
        self.inner.replace(key, value, expiry).await
    }

    async fn cas(
        &self,
        token: CasToken,
        key: &str,
        value: Vec<u8>,
        expiry: Expiry,
    ) -> TagCacheResult<bool> {
        self.check(BackendOp::Cas)?;
        self.inner.cas(token, key, value, expiry).await
    }

    async fn touch(&self, key: &str, expiry: Expiry) -> TagCacheResult<bool> {
        self.check(BackendOp::Touch)?;
        self.inner.touch(key, expiry).await
    }

    async fn flush(&self) -> TagCacheResult<bool> {
        self.check(BackendOp::Flush)?;
        self.inner.flush().await
    }
}

#[async_trait]
impl<B: TagSetBackend> TagSetBackend for FaultyBackend<B> {
    async fn s_add(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        self.check(BackendOp::SAdd)?;
        self.inner.s_add(set_key, members).await
    }

    async fn s_rem(&self, set_key: &str, members: &[String]) -> TagCacheResult<usize> {
        self.check(BackendOp::SRem)?;
        self.inner.s_rem(set_key, members).await
    }

    async fn s_members(&self, set_key: &str) -> TagCacheResult<Vec<String>> {
        self.check(BackendOp::SMembers)?;
        self.inner.s_members(set_key).await
    }

    async fn s_members_multi(
        &self,
        set_keys: &[String],
    ) -> TagCacheResult<HashMap<String, Vec<String>>> {
        self.check(BackendOp::SMembersMulti)?;
        self.inner.s_members_multi(set_keys).await
    }
}

#[async_trait]
impl<B: BatchBackend> BatchBackend for FaultyBackend<B> {
    async fn apply(&self, batch: WriteBatch) -> TagCacheResult<ResultMap> {
        self.check(BackendOp::Apply)?;
        self.inner.apply(batch).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tags, keys and write plans.

    use super::*;
    use proptest::prelude::*;

    /// A tag name from a small alphabet, so generated tag sets overlap.
    pub fn arb_tag() -> impl Strategy<Value = Tag> {
        "[a-e]{1,2}".prop_map(|name| Tag::new(name))
    }

    /// A tag list of up to `max` tags, duplicates allowed.
    pub fn arb_tags(max: usize) -> impl Strategy<Value = Vec<Tag>> {
        prop::collection::vec(arb_tag(), 0..=max)
    }

    /// A caller key that never collides with the index key spaces.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "k[0-9]{1,2}"
    }

    /// A sequence of tagged writes: `(key, value, tags)`.
    pub fn arb_write_plan(
        max_writes: usize,
    ) -> impl Strategy<Value = Vec<(String, i64, Vec<Tag>)>> {
        prop::collection::vec((arb_key(), any::<i64>(), arb_tags(4)), 1..=max_writes)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built backends and index snapshots.

    use super::*;
    use std::sync::Arc;

    /// An in-memory backend wrapped in a call recorder.
    pub fn recording_memory() -> Arc<RecordingBackend<MemoryBackend>> {
        Arc::new(RecordingBackend::new(MemoryBackend::new()))
    }

    /// An in-memory backend wrapped in a fault injector.
    pub fn faulty_memory() -> Arc<FaultyBackend<MemoryBackend>> {
        Arc::new(FaultyBackend::new(MemoryBackend::new()))
    }

    /// A fresh LMDB backend in a temporary directory. Keep the `TempDir`
    /// alive for as long as the backend is used.
    pub fn temp_lmdb() -> (LmdbBackend, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().expect("TempDir creation should succeed");
        let backend = LmdbBackend::new(dir.path(), 10).expect("backend creation should succeed");
        (backend, dir)
    }

    /// The full tag → members mapping for `tags`, with member lists sorted
    /// and empty sets omitted.
    pub async fn index_snapshot<B>(backend: &B, tags: &[Tag]) -> TagKeyMap
    where
        B: TagSetBackend + ?Sized,
    {
        let ns = KeyNamespace::default();
        let mut snapshot = TagKeyMap::new();
        for tag in tags {
            let mut members = backend
                .s_members(&ns.tag_key(tag))
                .await
                .expect("s_members should succeed");
            if members.is_empty() {
                continue;
            }
            members.sort();
            snapshot.insert(tag.clone(), members);
        }
        snapshot
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over recorded backend calls.

    use super::*;

    /// Assert that exactly the given `s_rem`/`s_add` calls were recorded for
    /// `key`, ignoring order across tags.
    #[track_caller]
    pub fn assert_index_calls(
        calls: &[BackendCall],
        op: BackendOp,
        key: &str,
        expected_tags: &[Tag],
    ) {
        let ns = KeyNamespace::default();
        let mut actual: Vec<String> = calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::SAdd { set_key, members } if op == BackendOp::SAdd => {
                    Some((set_key, members))
                }
                BackendCall::SRem { set_key, members } if op == BackendOp::SRem => {
                    Some((set_key, members))
                }
                _ => None,
            })
            .filter(|(_, members)| members.iter().any(|m| m == key))
            .map(|(set_key, _)| set_key.clone())
            .collect();
        actual.sort();

        let mut expected: Vec<String> = expected_tags.iter().map(|t| ns.tag_key(t)).collect();
        expected.sort();
        expected.dedup();

        assert_eq!(actual, expected, "{op:?} calls for key {key}");
    }

    /// Assert that a result is a validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TagCacheResult<T>) {
        match result {
            Err(TagCacheError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}
