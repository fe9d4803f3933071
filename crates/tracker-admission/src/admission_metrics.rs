//! Admission metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `tracker_admission_rejections_total` - Counter for rejected requests (labels: reason)
//! - `tracker_revocation_lookups_total` - Counter for token generation lookups (labels: cache)
//! - `tracker_rate_limited_total` - Counter for throttled requests (labels: route, caller)

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Initialize admission metric descriptions. Safe to call more than once.
#[cfg(feature = "metrics")]
pub fn init_admission_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "tracker_admission_rejections_total",
            "Requests rejected before reaching a handler"
        );
        describe_counter!(
            "tracker_revocation_lookups_total",
            "Token generation lookups against the revocation cache"
        );
        describe_counter!(
            "tracker_rate_limited_total",
            "Requests throttled by a token bucket"
        );
    });
}

#[cfg(feature = "metrics")]
pub(crate) fn record_rejection(reason: &'static str) {
    counter!("tracker_admission_rejections_total", "reason" => reason).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_revocation_lookup(cache_hit: bool) {
    let cache = if cache_hit { "hit" } else { "miss" };
    counter!("tracker_revocation_lookups_total", "cache" => cache).increment(1);
}

/// Record a throttled request
///
/// # Arguments
///
/// * `route` - Route template the bucket belongs to
/// * `caller` - `authenticated` or `anonymous`
#[cfg(feature = "metrics")]
pub(crate) fn record_rate_limited(route: &str, caller: &'static str) {
    counter!(
        "tracker_rate_limited_total",
        "route" => route.to_owned(),
        "caller" => caller
    )
    .increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_admission_metrics() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_rejection(_reason: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_revocation_lookup(_cache_hit: bool) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_rate_limited(_route: &str, _caller: &'static str) {}
