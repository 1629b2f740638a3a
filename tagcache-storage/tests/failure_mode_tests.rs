//! Failure Mode Tests
//!
//! Backend failures never surface as errors from index maintenance. They
//! degrade to `false`, empty results or missing tags, and the index drifts
//! only toward over-indexing, which later invalidations clean up.

use std::collections::HashMap;
use std::sync::Arc;

use tagcache_test_utils::assertions::assert_validation_error;
use tagcache_test_utils::fixtures::{faulty_memory, index_snapshot};
use tagcache_test_utils::{
    tags, BackendOp, Expiry, FaultyBackend, KeyValueBackend, MemoryBackend, Tag, TagKeyMap,
    TaggablePool, TaggableStore,
};

type FaultyPool = TaggablePool<FaultyBackend<MemoryBackend>, i64>;

// ============================================================================
// STORE
// ============================================================================

#[tokio::test]
async fn test_failed_value_write_over_indexes_until_invalidated() {
    let backend = faulty_memory();
    let store = TaggableStore::new(Arc::clone(&backend));

    backend.fail(BackendOp::SetMulti);
    let ok = store
        .set_with_tags("foo", &"bar", &tags(["lorem"]), Expiry::Never)
        .await
        .expect("backend failures are not errors");
    assert!(!ok);
    backend.heal_all();

    assert_eq!(store.get::<String>("foo").await.expect("get should succeed"), None);
    assert_eq!(
        index_snapshot(backend.inner(), &tags(["lorem"])).await,
        TagKeyMap::from([(Tag::new("lorem"), vec!["foo".to_string()])])
    );

    let results = store.invalidate_tags(&tags(["lorem"])).await;
    assert_eq!(results, HashMap::from([("foo".to_string(), false)]));
    assert!(index_snapshot(backend.inner(), &tags(["lorem"])).await.is_empty());
}

#[tokio::test]
async fn test_failed_index_add_still_writes_value() {
    let backend = faulty_memory();
    let store = TaggableStore::new(Arc::clone(&backend));

    backend.fail(BackendOp::SAdd);
    assert!(store
        .set_with_tags("foo", &1, &tags(["a"]), Expiry::Never)
        .await
        .expect("backend failures are not errors"));
    backend.heal_all();

    assert_eq!(store.get::<i64>("foo").await.expect("get should succeed"), Some(1));
    assert!(index_snapshot(backend.inner(), &tags(["a"])).await.is_empty());

    // the next write reasserts the full tag set
    assert!(store
        .set_with_tags("foo", &2, &tags(["a"]), Expiry::Never)
        .await
        .expect("set_with_tags should succeed"));
    assert_eq!(
        index_snapshot(backend.inner(), &tags(["a"])).await,
        TagKeyMap::from([(Tag::new("a"), vec!["foo".to_string()])])
    );
}

#[tokio::test]
async fn test_failed_previous_read_leaves_stale_membership() {
    let backend = faulty_memory();
    let store = TaggableStore::new(Arc::clone(&backend));

    store
        .set_with_tags("foo", &1, &tags(["a"]), Expiry::Never)
        .await
        .expect("set_with_tags should succeed");

    backend.fail(BackendOp::Get);
    assert!(store
        .set_with_tags("foo", &2, &tags(["b"]), Expiry::Never)
        .await
        .expect("backend failures are not errors"));
    backend.heal_all();

    assert_eq!(
        store.current_tags("foo").await.expect("current_tags should succeed"),
        tags(["b"])
    );
    // the old membership could not be diffed away
    assert_eq!(
        index_snapshot(backend.inner(), &tags(["a", "b"])).await,
        TagKeyMap::from([
            (Tag::new("a"), vec!["foo".to_string()]),
            (Tag::new("b"), vec!["foo".to_string()]),
        ])
    );

    // extra invalidation, never a stale read
    store.invalidate_tags(&tags(["a"])).await;
    assert_eq!(store.get::<i64>("foo").await.expect("get should succeed"), None);
    assert!(index_snapshot(backend.inner(), &tags(["a", "b"])).await.is_empty());
}

#[tokio::test]
async fn test_failed_member_lookup_invalidates_nothing() {
    let backend = faulty_memory();
    let store = TaggableStore::new(Arc::clone(&backend));

    store
        .set_with_tags("foo", &1, &tags(["a"]), Expiry::Never)
        .await
        .expect("set_with_tags should succeed");

    backend.fail(BackendOp::SMembersMulti);
    assert!(store.invalidate_tags(&tags(["a"])).await.is_empty());
    assert!(store
        .tag_index()
        .get_tags_cache_keys(&tags(["a"]))
        .await
        .is_err());
    backend.heal_all();

    assert_eq!(store.get::<i64>("foo").await.expect("get should succeed"), Some(1));
}

#[tokio::test]
async fn test_failed_batch_read_writes_everything_as_new() {
    let backend = faulty_memory();
    let store = TaggableStore::new(Arc::clone(&backend));

    backend.fail(BackendOp::GetMulti);
    let items = HashMap::from([("k1".to_string(), 1), ("k2".to_string(), 2)]);
    let tags_by_key = HashMap::from([("k1".to_string(), tags(["a"]))]);
    let results = store
        .set_multi_with_tags(&items, &tags_by_key, Expiry::Never)
        .await
        .expect("backend failures are not errors");
    backend.heal_all();

    assert_eq!(
        results,
        HashMap::from([("k1".to_string(), true), ("k2".to_string(), true)])
    );
    assert_eq!(
        index_snapshot(backend.inner(), &tags(["a"])).await,
        TagKeyMap::from([(Tag::new("a"), vec!["k1".to_string()])])
    );
}

#[tokio::test]
async fn test_delete_with_failed_read_is_cleaned_by_invalidation() {
    let backend = faulty_memory();
    let store = TaggableStore::new(Arc::clone(&backend));

    store
        .set_with_tags("foo", &1, &tags(["a"]), Expiry::Never)
        .await
        .expect("set_with_tags should succeed");

    backend.fail(BackendOp::Get);
    assert!(store.delete("foo").await.expect("backend failures are not errors"));
    backend.heal_all();
    assert!(!index_snapshot(backend.inner(), &tags(["a"])).await.is_empty());

    let results = store.invalidate_tags(&tags(["a"])).await;
    assert_eq!(results, HashMap::from([("foo".to_string(), false)]));
    assert!(index_snapshot(backend.inner(), &tags(["a"])).await.is_empty());
}

#[tokio::test]
async fn test_validation_errors_survive_backend_faults() {
    let backend = faulty_memory();
    let store = TaggableStore::new(Arc::clone(&backend));
    for op in [BackendOp::Get, BackendOp::SetMulti, BackendOp::GetMulti] {
        backend.fail(op);
    }

    assert_validation_error(&store.get::<i64>("[tag]x").await);
    assert_validation_error(
        &store
            .set_with_tags("[tags]x", &1, &tags(["a"]), Expiry::Never)
            .await,
    );
    assert_validation_error(&store.delete_multi(&["ok".to_string(), "[tag]y".to_string()]).await);
}

// ============================================================================
// POOL
// ============================================================================

#[tokio::test]
async fn test_failed_member_load_aborts_commit() {
    let backend = faulty_memory();
    let mut pool: FaultyPool = TaggablePool::new(Arc::clone(&backend));

    let item = pool.get_item("foo").await.expect("get_item should succeed");
    pool.save_deferred(item.set(1).set_tags(&tags(["a"])).into())
        .await
        .expect("save_deferred should succeed");

    backend.fail(BackendOp::SMembersMulti);
    assert!(!pool.commit().await);
    assert_eq!(pool.pending(), 0);
    backend.heal_all();

    // nothing was applied
    assert_eq!(backend.inner().get("foo").await.expect("get should succeed"), None);
    assert!(index_snapshot(backend.inner(), &tags(["a"])).await.is_empty());
}

#[tokio::test]
async fn test_failed_apply_empties_queue() {
    let backend = faulty_memory();
    let mut pool: FaultyPool = TaggablePool::new(Arc::clone(&backend));

    for key in ["k1", "k2"] {
        let item = pool.get_item(key).await.expect("get_item should succeed");
        pool.save_deferred(item.set(1).into())
            .await
            .expect("save_deferred should succeed");
    }

    backend.fail(BackendOp::Apply);
    assert!(!pool.commit().await);
    assert_eq!(pool.pending(), 0);
    backend.heal_all();

    assert!(!pool.has_item("k1").await.expect("has_item should succeed"));
    assert!(pool.commit().await);
}

#[tokio::test]
async fn test_failed_tag_resolution_reports_no_tags() {
    let backend = faulty_memory();
    let mut pool: FaultyPool = TaggablePool::new(Arc::clone(&backend));

    let item = pool.get_item("foo").await.expect("get_item should succeed");
    assert!(pool
        .save(item.set(7).set_tags(&tags(["a", "b"])).into())
        .await
        .expect("save should succeed"));

    let item = pool.get_item("foo").await.expect("get_item should succeed");
    assert!(item.is_hit());
    backend.fail(BackendOp::GetMulti);
    assert!(pool.current_tags(&item).await.is_empty());
    backend.heal_all();

    let again = pool.get_item("foo").await.expect("get_item should succeed");
    assert_eq!(pool.current_tags(&again).await, tags(["a", "b"]));
}

#[tokio::test]
async fn test_failed_lookup_is_a_miss() {
    let backend = faulty_memory();
    let mut pool: FaultyPool = TaggablePool::new(Arc::clone(&backend));

    let item = pool.get_item("foo").await.expect("get_item should succeed");
    assert!(pool
        .save(item.set(7).into())
        .await
        .expect("save should succeed"));

    backend.fail(BackendOp::Get);
    let item = pool.get_item("foo").await.expect("backend failures are not errors");
    assert!(!item.is_hit());
    assert_eq!(item.get(), None);
}
