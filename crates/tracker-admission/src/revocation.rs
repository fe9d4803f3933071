//! Cache-aside lookup of each user's current credential generation.
//!
//! A token is only honoured while the generation it carries equals the
//! user's current generation. Bumping the generation in the backing store
//! and then calling [`RevocationCache::invalidate`] revokes every token
//! issued before the bump.
//!
//! ## Consistency
//!
//! Reads never hold a map guard across the await on the backing source.
//! A lookup that was in flight while an invalidation (or `put`) happened
//! returns what it fetched but does not populate the cache, so a
//! generation read before an invalidation can never outlive it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::admission_metrics;
use crate::error::SourceError;

/// Authoritative store of per-user credential generations.
#[async_trait]
pub trait RevocationSource: Send + Sync + 'static {
    /// Current generation for `user_id`.
    ///
    /// # Errors
    ///
    /// [`SourceError::UnknownUser`] if the user does not exist,
    /// [`SourceError::Unavailable`] if the store cannot be reached.
    async fn current_version(&self, user_id: &str) -> Result<u64, SourceError>;
}

/// Point-in-time cache counters, as served by the admin stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub entry_count: usize,
}

/// Cache of user id to current generation in front of a [`RevocationSource`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use tracker_admission::{RevocationCache, RevocationSource, SourceError};
///
/// struct Fixed;
///
/// #[async_trait]
/// impl RevocationSource for Fixed {
///     async fn current_version(&self, _user_id: &str) -> Result<u64, SourceError> {
///         Ok(3)
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let cache = RevocationCache::new(Arc::new(Fixed));
/// assert_eq!(cache.get_version("alice").await.unwrap(), 3);
/// assert_eq!(cache.get_version("alice").await.unwrap(), 3);
/// assert_eq!(cache.stats().hit_count, 1);
/// # });
/// ```
pub struct RevocationCache {
    source: Arc<dyn RevocationSource>,
    entries: DashMap<String, u64>,
    /// Bumped on every invalidate/put; in-flight fills compare against it
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for RevocationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationCache")
            .field("entries", &self.entries.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl RevocationCache {
    pub fn new(source: Arc<dyn RevocationSource>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Current generation for `user_id`, from cache or the backing source.
    ///
    /// # Errors
    ///
    /// Propagates the source's error on a miss. Failures are never cached.
    pub async fn get_version(&self, user_id: &str) -> Result<u64, SourceError> {
        if let Some(version) = self.entries.get(user_id).map(|entry| *entry) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            admission_metrics::record_revocation_lookup(true);
            trace!(user_id, version, "revocation cache hit");
            return Ok(version);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        admission_metrics::record_revocation_lookup(false);

        let epoch = self.epoch.load(Ordering::Acquire);
        let version = self.source.current_version(user_id).await?;

        // Check and fill under the shard lock so a concurrent invalidate either
        // bumps the epoch first or removes our entry after we insert it.
        let slot = self.entries.entry(user_id.to_owned());
        if self.epoch.load(Ordering::Acquire) == epoch {
            slot.insert(version);
        } else {
            drop(slot);
            debug!(user_id, "cache changed during lookup, not populating");
        }
        Ok(version)
    }

    /// Drop the cached generation for `user_id`. The next lookup reads the source.
    pub fn invalidate(&self, user_id: &str) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if self.entries.remove(user_id).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        debug!(user_id, "revocation cache entry invalidated");
    }

    /// Seed the cache with a generation the caller just wrote to the source.
    pub fn put(&self, user_id: &str, version: u64) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.insert(user_id.to_owned(), version);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let total = hit_count + miss_count;
        CacheStats {
            hit_count,
            miss_count,
            hit_rate: if total == 0 {
                0.0
            } else {
                hit_count as f64 / total as f64
            },
            eviction_count: self.evictions.load(Ordering::Relaxed),
            entry_count: self.entries.len(),
        }
    }
}
