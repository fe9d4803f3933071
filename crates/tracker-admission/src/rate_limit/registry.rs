//! Per-route quota resolution.

use std::num::NonZeroU32;
use std::time::Duration;

use http::Method;

use super::Caller;
use crate::route::{RouteTemplate, TemplateError};

/// Requests per minute for callers with a valid token and no matching rule.
pub const DEFAULT_AUTHENTICATED_LIMIT: NonZeroU32 = NonZeroU32::MIN.saturating_add(9);

/// Requests per minute for anonymous callers with no matching rule.
pub const DEFAULT_ANONYMOUS_LIMIT: NonZeroU32 = NonZeroU32::MIN.saturating_add(4);

/// A bucket's shape: `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    limit: NonZeroU32,
    window: Duration,
}

impl Quota {
    /// Create a quota. A zero window is clamped to one nanosecond.
    pub fn new(limit: NonZeroU32, window: Duration) -> Self {
        Self {
            limit,
            window: window.max(Duration::from_nanos(1)),
        }
    }

    /// `limit` requests per minute.
    pub fn per_minute(limit: NonZeroU32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Bucket capacity.
    pub fn limit(&self) -> NonZeroU32 {
        self.limit
    }

    /// Time for a drained bucket to refill completely.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Tokens added per second.
    pub fn refill_per_second(&self) -> f64 {
        f64::from(self.limit.get()) / self.window.as_secs_f64()
    }

    /// Whichever of the two admits fewer requests over time. Ties keep `self`.
    pub fn stricter(self, other: Self) -> Self {
        // a/wa <= b/wb  <=>  a*wb <= b*wa
        let ours = u128::from(self.limit.get()) * other.window.as_nanos();
        let theirs = u128::from(other.limit.get()) * self.window.as_nanos();
        if ours <= theirs { self } else { other }
    }
}

/// An explicit quota for one (template, method) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub template: RouteTemplate,
    pub method: Method,
    pub limit: NonZeroU32,
    pub window: Duration,
}

impl RateLimitRule {
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template does not compile.
    pub fn new(
        template: &str,
        method: Method,
        limit: NonZeroU32,
        window: Duration,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            template: RouteTemplate::new(template)?,
            method,
            limit,
            window,
        })
    }

    pub fn quota(&self) -> Quota {
        Quota::new(self.limit, self.window)
    }

    fn applies_to(&self, path: &str, method: &Method) -> bool {
        self.method == *method && self.template.matches(path)
    }
}

/// Outcome of [`RateLimitRegistry::resolve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedQuota<'a> {
    /// The configured rule that matched, if any
    pub rule: Option<&'a RateLimitRule>,
    pub quota: Quota,
}

/// Configured rules plus the fallback quotas for each kind of caller.
#[derive(Debug, Clone)]
pub struct RateLimitRegistry {
    rules: Vec<RateLimitRule>,
    authenticated_default: Quota,
    anonymous_default: Quota,
}

impl Default for RateLimitRegistry {
    fn default() -> Self {
        Self::new(
            Quota::per_minute(DEFAULT_AUTHENTICATED_LIMIT),
            Quota::per_minute(DEFAULT_ANONYMOUS_LIMIT),
        )
    }
}

impl RateLimitRegistry {
    pub fn new(authenticated_default: Quota, anonymous_default: Quota) -> Self {
        Self {
            rules: Vec::new(),
            authenticated_default,
            anonymous_default,
        }
    }

    /// Append a rule. Rules are consulted in the order they were added.
    pub fn with_rule(mut self, rule: RateLimitRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Quota for a request.
    ///
    /// The first rule matching both path and method wins. Without one, the
    /// caller's default applies. Anonymous callers get the stricter of the
    /// rule and the anonymous default.
    pub fn resolve(&self, path: &str, method: &Method, caller: Caller) -> ResolvedQuota<'_> {
        if let Some(rule) = self.rules.iter().find(|r| r.applies_to(path, method)) {
            let quota = match caller {
                Caller::Authenticated => rule.quota(),
                Caller::Anonymous => rule.quota().stricter(self.anonymous_default),
            };
            return ResolvedQuota {
                rule: Some(rule),
                quota,
            };
        }

        let quota = match caller {
            Caller::Authenticated => self.authenticated_default,
            Caller::Anonymous => self.anonymous_default,
        };
        ResolvedQuota { rule: None, quota }
    }

    pub fn rules(&self) -> &[RateLimitRule] {
        &self.rules
    }

    pub fn authenticated_default(&self) -> Quota {
        self.authenticated_default
    }

    pub fn anonymous_default(&self) -> Quota {
        self.anonymous_default
    }
}
