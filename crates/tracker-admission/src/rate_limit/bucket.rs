//! Token buckets and the concurrent store that owns them.
//!
//! Arithmetic is exact: one token is `window` nanoseconds' worth of units
//! and every elapsed nanosecond adds `limit` units. A bucket of 5 per 60 s
//! therefore earns back precisely one token every 12 s.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::Method;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::Identity;
use super::registry::Quota;

/// One caller's allowance for one route and method.
#[derive(Debug, Clone)]
pub struct Bucket {
    limit: u128,
    units_per_token: u128,
    capacity: u128,
    available: u128,
    last_refill: Instant,
}

impl Bucket {
    /// A full bucket.
    pub fn new(quota: Quota, now: Instant) -> Self {
        let limit = u128::from(quota.limit().get());
        let units_per_token = quota.window().as_nanos();
        let capacity = limit.saturating_mul(units_per_token);
        Self {
            limit,
            units_per_token,
            capacity,
            available: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        // An instant older than the last refill adds nothing and never rewinds the clock
        let elapsed = now.saturating_duration_since(self.last_refill).as_nanos();
        if elapsed == 0 {
            return;
        }
        self.available = self
            .available
            .saturating_add(elapsed.saturating_mul(self.limit))
            .min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token.
    ///
    /// # Errors
    ///
    /// When the bucket is empty, returns how long until one token is available.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.available >= self.units_per_token {
            self.available -= self.units_per_token;
            return Ok(());
        }

        let missing = self.units_per_token - self.available;
        let nanos = missing.div_ceil(self.limit);
        Err(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Whole tokens available as of the last refill.
    pub fn available_tokens(&self) -> u32 {
        u32::try_from(self.available / self.units_per_token).unwrap_or(u32::MAX)
    }
}

/// Identifies a bucket: who is calling, which route template, which method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub identity: Identity,
    pub route: String,
    pub method: Method,
}

impl BucketKey {
    pub fn new(identity: Identity, route: impl Into<String>, method: Method) -> Self {
        Self {
            identity,
            route: route.into(),
            method,
        }
    }
}

/// Concurrent map of buckets with atomic get-or-create.
///
/// Buckets live for the lifetime of the store.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: DashMap<BucketKey, Arc<Mutex<Bucket>>>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token from the bucket for `key`, creating it full with `quota` on first use.
    ///
    /// # Errors
    ///
    /// Returns the wait until the next token when the bucket is empty.
    pub fn try_consume(&self, key: BucketKey, quota: Quota) -> Result<(), Duration> {
        let bucket = self.bucket(key, quota, Instant::now());
        let mut bucket = bucket.lock();
        bucket.try_acquire(Instant::now())
    }

    /// Like [`try_consume`](Self::try_consume) with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns the wait until the next token when the bucket is empty.
    pub fn try_consume_at(
        &self,
        key: BucketKey,
        quota: Quota,
        now: Instant,
    ) -> Result<(), Duration> {
        self.bucket(key, quota, now).lock().try_acquire(now)
    }

    fn bucket(&self, key: BucketKey, quota: Quota, now: Instant) -> Arc<Mutex<Bucket>> {
        // The shard guard is released at the end of this statement, before
        // the caller locks the bucket itself.
        Arc::clone(
            self.buckets
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(quota, now))))
                .value(),
        )
    }

    /// Whole tokens left in the bucket for `key`, if it exists.
    pub fn available(&self, key: &BucketKey) -> Option<u32> {
        let bucket = self.buckets.get(key).map(|b| Arc::clone(b.value()))?;
        let tokens = bucket.lock().available_tokens();
        Some(tokens)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
