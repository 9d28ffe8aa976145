//! Hot read-through cache using [`moka`].
//!
//! Group documents are consulted on every incoming group message (antilink,
//! antispam, mute...), so [`GroupStore`](crate::groups::GroupStore) keeps
//! recent ones here. Entries expire after a fixed TTL. Writes from this
//! process replace the entry with the stored document; a reader that loaded
//! an older revision cannot put it back (see [`CacheLayer::insert_newest`]).

use std::marker::PhantomData;
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::Op;
use tracing::debug;

/// A named, bounded, time-limited cache of `T` keyed by string.
pub struct CacheLayer<T> {
    name: &'static str,
    inner: Cache<String, T>,
}

impl<T> Clone for CacheLayer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
        }
    }
}

impl<T> CacheLayer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start building a new cache layer.
    pub fn builder(name: &'static str) -> CacheLayerBuilder<T> {
        CacheLayerBuilder {
            name,
            max_capacity: 1_000,
            ttl: Duration::from_secs(60),
            _marker: PhantomData,
        }
    }

    /// Cached value for `key`, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<T> {
        let hit = self.inner.get(key).await;
        debug!(cache = self.name, key, hit = hit.is_some(), "cache lookup");
        hit
    }

    /// Insert or replace the value for `key`.
    pub async fn insert(&self, key: &str, value: T) {
        self.inner.insert(key.to_string(), value).await;
    }

    /// Insert `value` unless the cached entry ranks strictly higher.
    ///
    /// `rank` is a per-key version that only grows with writes; the
    /// comparison and the replacement happen atomically for `key`.
    pub async fn insert_newest<R>(&self, key: &str, value: T, rank: R)
    where
        R: Fn(&T) -> i64,
    {
        let incoming = rank(&value);
        let mut kept_existing = false;
        self.inner
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if rank(entry.value()) > incoming => {
                        kept_existing = true;
                        Op::Nop
                    }
                    _ => Op::Put(value),
                };
                std::future::ready(op)
            })
            .await;
        if kept_existing {
            debug!(cache = self.name, key, "cache kept newer entry");
        }
    }

    /// Drop the entry for `key`.
    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
        debug!(cache = self.name, key, "cache invalidate");
    }
}

/// Builder for [`CacheLayer`].
pub struct CacheLayerBuilder<T> {
    name: &'static str,
    max_capacity: u64,
    ttl: Duration,
    _marker: PhantomData<T>,
}

impl<T> CacheLayerBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Maximum number of entries held at once.
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    /// Lifetime of each entry.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Build the cache layer.
    pub fn build(self) -> CacheLayer<T> {
        let inner = Cache::builder()
            .max_capacity(self.max_capacity)
            .time_to_live(self.ttl)
            .build();

        debug!(
            name = self.name,
            max_capacity = self.max_capacity,
            ttl_secs = self.ttl.as_secs(),
            "cache layer created"
        );

        CacheLayer {
            name: self.name,
            inner,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cache() -> CacheLayer<String> {
        CacheLayer::builder("test")
            .max_capacity(16)
            .ttl(Duration::from_secs(60))
            .build()
    }

    #[tokio::test]
    async fn insert_get_invalidate() {
        let cache = make_cache();
        assert!(cache.get("g1").await.is_none());

        cache.insert("g1", "value".to_string()).await;
        assert_eq!(cache.get("g1").await.as_deref(), Some("value"));

        cache.invalidate("g1").await;
        assert!(cache.get("g1").await.is_none());
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = make_cache();
        let other = cache.clone();
        cache.insert("k", "v".to_string()).await;
        assert_eq!(other.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn insert_newest_never_downgrades() {
        let cache: CacheLayer<(i64, &'static str)> = CacheLayer::builder("ranked").build();
        let rank = |v: &(i64, &'static str)| v.0;

        cache.insert_newest("g", (2, "fresh"), rank).await;
        cache.insert_newest("g", (1, "stale"), rank).await;
        assert_eq!(cache.get("g").await, Some((2, "fresh")));

        cache.insert_newest("g", (3, "newer"), rank).await;
        assert_eq!(cache.get("g").await, Some((3, "newer")));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache: CacheLayer<String> = CacheLayer::builder("short")
            .ttl(Duration::from_millis(50))
            .build();
        cache.insert("k", "v".to_string()).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get("k").await.is_none());
    }
}
