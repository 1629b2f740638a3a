//! LMDB Integration Tests
//!
//! The store and pool over a real LMDB environment, including an index that
//! outlives the process-level handle.

use std::collections::HashMap;
use std::sync::Arc;

use tagcache_test_utils::fixtures::{index_snapshot, temp_lmdb};
use tagcache_test_utils::{
    tags, Expiry, LmdbBackend, Tag, TagKeyMap, TaggablePool, TaggableStore,
};

#[tokio::test]
async fn test_store_invalidation_over_lmdb() {
    let (backend, _dir) = temp_lmdb();
    let backend = Arc::new(backend);
    let store = TaggableStore::new(Arc::clone(&backend));

    store
        .set_with_tags("foo", &"bar", &tags(["lorem", "ipsum"]), Expiry::Never)
        .await
        .expect("set_with_tags should succeed");
    store
        .set_with_tags("baz", &"qux", &tags(["lorem"]), Expiry::Never)
        .await
        .expect("set_with_tags should succeed");

    let results = store.invalidate_tags(&tags(["ipsum"])).await;
    assert_eq!(results, HashMap::from([("foo".to_string(), true)]));

    assert_eq!(store.get::<String>("foo").await.expect("get should succeed"), None);
    assert_eq!(
        store.get::<String>("baz").await.expect("get should succeed"),
        Some("qux".to_string())
    );
    assert_eq!(
        index_snapshot(backend.as_ref(), &tags(["lorem", "ipsum"])).await,
        TagKeyMap::from([(Tag::new("lorem"), vec!["baz".to_string()])])
    );
}

#[tokio::test]
async fn test_pool_index_survives_reopen() {
    let (backend, dir) = temp_lmdb();
    {
        let backend = Arc::new(backend);
        let mut pool: TaggablePool<LmdbBackend, i64> = TaggablePool::new(Arc::clone(&backend));
        for (key, value, key_tags) in [("k1", 1, tags(["a", "b"])), ("k2", 2, tags(["b"]))] {
            let item = pool.get_item(key).await.expect("get_item should succeed");
            pool.save_deferred(item.set(value).set_tags(&key_tags).into())
                .await
                .expect("save_deferred should succeed");
        }
        assert!(pool.commit().await);
    }

    let backend = Arc::new(LmdbBackend::new(dir.path(), 10).expect("backend should reopen"));
    let store = TaggableStore::new(Arc::clone(&backend));

    assert_eq!(
        store.current_tags("k1").await.expect("current_tags should succeed"),
        tags(["a", "b"])
    );
    let mut members = store
        .tag_index()
        .get_tags_cache_keys(&tags(["b"]))
        .await
        .expect("lookup should succeed");
    members.sort();
    assert_eq!(members, vec!["k1", "k2"]);

    let results = store.invalidate_tags(&tags(["a"])).await;
    assert_eq!(results, HashMap::from([("k1".to_string(), true)]));
    assert_eq!(
        index_snapshot(backend.as_ref(), &tags(["a", "b"])).await,
        TagKeyMap::from([(Tag::new("b"), vec!["k2".to_string()])])
    );
}

#[tokio::test]
async fn test_pool_retag_over_lmdb() {
    let (backend, _dir) = temp_lmdb();
    let backend = Arc::new(backend);
    let mut pool: TaggablePool<LmdbBackend, String> = TaggablePool::new(Arc::clone(&backend));

    let item = pool.get_item("foo").await.expect("get_item should succeed");
    assert!(pool
        .save(item.set("v1".to_string()).set_tags(&tags(["x", "y"])).into())
        .await
        .expect("save should succeed"));

    let item = pool.get_item("foo").await.expect("get_item should succeed");
    assert_eq!(pool.current_tags(&item).await, tags(["x", "y"]));
    assert!(pool
        .save(item.set("v2".to_string()).set_tags(&tags(["y", "z"])).into())
        .await
        .expect("save should succeed"));

    assert_eq!(
        index_snapshot(backend.as_ref(), &tags(["x", "y", "z"])).await,
        TagKeyMap::from([
            (Tag::new("y"), vec!["foo".to_string()]),
            (Tag::new("z"), vec!["foo".to_string()]),
        ])
    );

    let results = pool.invalidate_tags(&tags(["z"])).await;
    assert_eq!(results, HashMap::from([("foo".to_string(), true)]));
    assert!(!pool.has_item("foo").await.expect("has_item should succeed"));
}

#[tokio::test]
async fn test_counter_keeps_tags_over_lmdb() {
    let (backend, _dir) = temp_lmdb();
    let backend = Arc::new(backend);
    let store = TaggableStore::new(Arc::clone(&backend));

    store
        .set_with_tags("hits", &10, &tags(["stats"]), Expiry::Never)
        .await
        .expect("set_with_tags should succeed");

    assert_eq!(
        store
            .increment("hits", 5, 0, Expiry::Never)
            .await
            .expect("increment should succeed"),
        Some(15)
    );
    assert_eq!(
        store
            .decrement("hits", 100, 0, Expiry::Never)
            .await
            .expect("decrement should succeed"),
        Some(0)
    );
    assert_eq!(
        store.current_tags("hits").await.expect("current_tags should succeed"),
        tags(["stats"])
    );

    store.invalidate_tags(&tags(["stats"])).await;
    assert_eq!(store.get::<i64>("hits").await.expect("get should succeed"), None);
}
