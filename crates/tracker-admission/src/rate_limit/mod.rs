//! Per-caller, per-route rate limiting
//!
//! Every (caller, route template, method) triple owns a token bucket whose
//! capacity is the resolved limit and whose refill rate is `limit / window`.
//!
//! ## Quota resolution
//!
//! 1. The first configured [`RateLimitRule`] matching path and method
//! 2. Otherwise the authenticated default (10 per minute) for callers with a
//!    verified token, or the stricter anonymous default (5 per minute)
//!
//! An anonymous caller never gets a looser rate than the anonymous default,
//! even on a route with its own rule.
//!
//! Anonymous callers are keyed by client address, so they never share a
//! bucket with any authenticated user. Paths matching neither a rule nor a
//! registered route all share the [`UNMATCHED_ROUTE`] bucket.

mod bucket;
mod registry;

pub use bucket::{Bucket, BucketKey, BucketStore};
pub use registry::{
    DEFAULT_ANONYMOUS_LIMIT, DEFAULT_AUTHENTICATED_LIMIT, Quota, RateLimitRegistry,
    RateLimitRule, ResolvedQuota,
};

use std::fmt;
use std::time::Duration;

use http::Method;
use tokio::time::Instant;
use tracing::warn;

use crate::admission_metrics;

/// Bucket route key for paths that match no rule and no registered route.
pub const UNMATCHED_ROUTE: &str = "*";

/// Whether the caller presented a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    Authenticated,
    Anonymous,
}

impl Caller {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::Anonymous => "anonymous",
        }
    }
}

/// Who a bucket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Verified token subject
    User(String),
    /// Client network address of an unauthenticated caller
    Anonymous(String),
}

impl Identity {
    pub fn caller(&self) -> Caller {
        match self {
            Self::User(_) => Caller::Authenticated,
            Self::Anonymous(_) => Caller::Anonymous,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => f.write_str(id),
            Self::Anonymous(addr) => write!(f, "anonymous:{addr}"),
        }
    }
}

/// Details of a throttled request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Time until one token is available again
    pub retry_after: Duration,
    /// Bucket capacity
    pub limit: u32,
    /// Time for an empty bucket to refill completely
    pub window: Duration,
    /// Whether the caller was anonymous
    pub caller: Caller,
}

impl RateLimitInfo {
    /// `retry_after` in whole seconds, rounded up, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        secs.max(1)
    }
}

impl fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests per {:?}, retry after {}s",
            self.limit,
            self.window,
            self.retry_after_secs()
        )
    }
}

impl std::error::Error for RateLimitInfo {}

/// Quota registry plus the buckets it governs.
#[derive(Debug, Default)]
pub struct RateLimiter {
    registry: RateLimitRegistry,
    store: BucketStore,
}

impl RateLimiter {
    pub fn new(registry: RateLimitRegistry) -> Self {
        Self {
            registry,
            store: BucketStore::new(),
        }
    }

    /// Consume one token for this request.
    ///
    /// `route` is the registered route template the path matched, if any.
    /// The bucket is keyed by the matching rule's template, else `route`,
    /// else [`UNMATCHED_ROUTE`].
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitInfo`] when the bucket is empty.
    pub fn check(
        &self,
        identity: &Identity,
        path: &str,
        route: Option<&str>,
        method: &Method,
    ) -> Result<(), RateLimitInfo> {
        self.check_at(identity, path, route, method, Instant::now())
    }

    /// Like [`check`](Self::check) with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitInfo`] when the bucket is empty.
    pub fn check_at(
        &self,
        identity: &Identity,
        path: &str,
        route: Option<&str>,
        method: &Method,
        now: Instant,
    ) -> Result<(), RateLimitInfo> {
        let caller = identity.caller();
        let resolved = self.registry.resolve(path, method, caller);
        let bucket_route = resolved
            .rule
            .map(|r| r.template.as_str())
            .or(route)
            .unwrap_or(UNMATCHED_ROUTE);

        let key = BucketKey::new(identity.clone(), bucket_route, method.clone());
        self.store
            .try_consume_at(key, resolved.quota, now)
            .map_err(|retry_after| {
                warn!(
                    identity = %identity,
                    route = bucket_route,
                    %method,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limit exceeded"
                );
                admission_metrics::record_rate_limited(bucket_route, caller.as_str());
                RateLimitInfo {
                    retry_after,
                    limit: resolved.quota.limit().get(),
                    window: resolved.quota.window(),
                    caller,
                }
            })
    }

    pub fn registry(&self) -> &RateLimitRegistry {
        &self.registry
    }

    pub fn store(&self) -> &BucketStore {
        &self.store
    }
}
