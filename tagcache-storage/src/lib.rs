//! Tagcache Storage - Tag Index and Invalidation Engine
//!
//! Layers a tag-based secondary index on top of any key-value backend that
//! implements [`KeyValueBackend`] and [`TagSetBackend`]. Every stored value is
//! wrapped with its tags; a reverse index maps each tag to its member keys so
//! that [`TaggableStore::invalidate_tags`] can delete a whole group at once.
//!
//! Two write paths share the same index layout:
//! - [`TaggableStore`]: immediate single- and multi-key operations
//! - [`TaggablePool`]: deferred writes reconciled and committed in one
//!   [`BatchBackend::apply`] round trip
//!
//! Backend failures never cross the index-maintenance boundary: they are
//! logged and reported as `false` / empty results.

pub mod backend;
pub mod index;
pub mod pool;
pub mod repository;
pub mod store;

pub use backend::{
    BatchBackend, CacheStats, KeyValueBackend, LmdbBackend, LmdbBackendError, MemoryBackend,
    ResultMap, TagSetBackend, ValueMap, WriteBatch,
};
pub use index::TagIndexAdapter;
pub use pool::{PoolWrite, TaggableItem, TaggablePool};
pub use repository::TaggableRepository;
pub use store::TaggableStore;

use std::fmt;

use tagcache_core::TagCacheResult;

/// Collapse a backend result to its value, or the type's default (`false`,
/// `None`, empty) after logging the failure.
pub(crate) fn settle<V: Default>(
    op: &'static str,
    subject: impl fmt::Display,
    result: TagCacheResult<V>,
) -> V {
    result.unwrap_or_else(|e| {
        tracing::warn!(op, subject = %subject, error = %e, "backend call failed");
        V::default()
    })
}

/// Short description of a key batch for log fields.
pub(crate) struct KeyCount(pub usize);

impl fmt::Display for KeyCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} keys", self.0)
    }
}
