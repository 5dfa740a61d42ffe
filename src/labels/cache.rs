use super::LabelSet;
use crate::oci::ResolveError;
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// TTL cache of resolved label sets keyed by canonical image reference.
///
/// Concurrent misses for the same key share a single fetch and all observe
/// its result. Failed fetches are handed to every waiter but never stored,
/// so the next access fetches again.
#[derive(Clone)]
pub struct LabelCache {
    cache: Cache<String, LabelSet>,
}

impl LabelCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();

        Self { cache }
    }

    /// Return the cached labels for `key`, running `fetch` on a miss or expiry
    pub async fn resolve<F>(&self, key: &str, fetch: F) -> Result<LabelSet, ResolveError>
    where
        F: Future<Output = Result<LabelSet, ResolveError>> + Send,
    {
        self.cache
            .try_get_with_by_ref(key, fetch)
            .await
            .map_err(|e: Arc<ResolveError>| (*e).clone())
    }

    pub async fn get(&self, key: &str) -> Option<LabelSet> {
        self.cache.get(key).await
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Approximate number of live entries
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}
