//! # Tracker Admission - Request Admission Control
//!
//! Decides, for every inbound request to the interview tracker API, whether
//! it may reach a handler.
//!
//! ## Stages
//!
//! 1. **Authentication** - a signed bearer token must verify, be unexpired,
//!    and carry the user's current credential generation. Public routes also
//!    admit anonymous callers.
//! 2. **Rate limiting** - a token bucket per (caller, route template, method).
//!    Anonymous callers are keyed by client address and get a stricter default.
//!
//! The first rejection wins. Authentication failures are 401, throttling is
//! 429 with `Retry-After`, and an unreachable revocation source is 503: the
//! pipeline fails closed.
//!
//! ## Architecture
//!
//! - [`token`] - HS256 token codec and the [`Principal`] it yields
//! - [`revocation`] - cache-aside generation lookup with explicit invalidation
//! - [`gate`] - bearer extraction, revocation check, sliding renewal
//! - [`route`] - `{param}` route templates and the route table
//! - [`rate_limit`] - quotas, token buckets, the concurrent bucket store
//! - [`pipeline`] - ordered stages producing an [`Admission`]
//! - [`tower`] - `Layer`/`Service` wrapping any HTTP service
//! - [`config`] - deserializable settings and validation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tracker_admission::{
//!     AdmissionPipeline, AuthConfig, AuthenticationGate, RateLimitConfig, RateLimiter,
//!     RevocationCache, RouteTable, tower::AdmissionLayer,
//! };
//!
//! let auth = AuthConfig::new("change-me");
//! let codec = Arc::new(auth.codec()?);
//! let revocation = Arc::new(RevocationCache::new(user_store));
//! let gate = AuthenticationGate::new(codec, revocation).with_renewal(auth.token_ttl());
//! let limiter = RateLimiter::new(RateLimitConfig::default().registry()?);
//! let routes = RouteTable::new()
//!     .public(Method::POST, "/api/v1/user/register")?
//!     .protected(Method::GET, "/api/v1/jobs/{jobId}/interview")?;
//!
//! let layer = AdmissionLayer::new(AdmissionPipeline::new(routes, gate, limiter));
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - admission counters through the `metrics` facade

pub mod admission_metrics;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod rate_limit;
pub mod revocation;
pub mod route;
pub mod token;
pub mod tower;

pub use admission_metrics::init_admission_metrics;
pub use config::{
    AuthConfig, ConfigError, LimitConfig, MAX_TOKEN_TTL_SECONDS, RateLimitConfig, RouteLimitConfig,
};
pub use error::{AdmissionError, SourceError};
pub use gate::{AuthenticationGate, GateOutcome, bearer_token};
pub use pipeline::{Admission, AdmissionContext, AdmissionPipeline, AdmissionStage};
pub use rate_limit::{
    BucketKey, BucketStore, Caller, Identity, Quota, RateLimitInfo, RateLimitRegistry,
    RateLimitRule, RateLimiter,
};
pub use revocation::{CacheStats, RevocationCache, RevocationSource};
pub use route::{Access, RouteSpec, RouteTable, RouteTemplate, TemplateError};
pub use token::{Principal, TOKEN_VERSION_CLAIM, TokenCodec};
