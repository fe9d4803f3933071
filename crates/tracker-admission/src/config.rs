//! Admission configuration types
//!
//! These deserialize from the `[auth]` and `[rate_limits]` tables of the
//! server configuration and validate into runtime types.
//!
//! ```toml
//! [auth]
//! signing_key = "change-me"
//! token_ttl_seconds = 3600
//! renew_tokens = true
//!
//! [rate_limits.anonymous_default]
//! limit = 5
//! duration_seconds = 60
//!
//! [[rate_limits.rules]]
//! path = "/api/v1/jobs/{jobId}/interview"
//! methods = { GET = { limit = 30, duration_seconds = 60 } }
//! ```

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

use http::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::rate_limit::{
    DEFAULT_ANONYMOUS_LIMIT, DEFAULT_AUTHENTICATED_LIMIT, Quota, RateLimitRegistry, RateLimitRule,
};
use crate::route::TemplateError;
use crate::token::TokenCodec;

/// Longest accepted token lifetime, one year.
pub const MAX_TOKEN_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Configuration that cannot be turned into a working admission setup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("auth.signing_key must not be empty")]
    EmptySigningKey,

    #[error("auth.token_ttl_seconds must be positive")]
    ZeroTokenTtl,

    #[error("auth.token_ttl_seconds must not exceed {max}")]
    TokenTtlTooLong { max: u64 },

    #[error("{context}: limit must be positive")]
    ZeroLimit { context: String },

    #[error("{context}: duration_seconds must be positive")]
    ZeroWindow { context: String },

    #[error("rate limit rule for {path}: invalid HTTP method {method:?}")]
    InvalidMethod { path: String, method: String },

    #[error(transparent)]
    InvalidTemplate(#[from] TemplateError),
}

/// Token signing and lifetime settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for HS256
    pub signing_key: SecretString,
    /// Lifetime of issued and renewed tokens
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Reissue each accepted token with a fresh expiry
    #[serde(default = "default_renew_tokens")]
    pub renew_tokens: bool,
}

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_renew_tokens() -> bool {
    true
}

impl AuthConfig {
    pub fn new(signing_key: impl Into<String>) -> Self {
        Self {
            signing_key: SecretString::new(signing_key.into()),
            token_ttl_seconds: default_token_ttl_seconds(),
            renew_tokens: default_renew_tokens(),
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    /// # Errors
    ///
    /// [`ConfigError::EmptySigningKey`], [`ConfigError::ZeroTokenTtl`] or
    /// [`ConfigError::TokenTtlTooLong`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::EmptySigningKey);
        }
        if self.token_ttl_seconds == 0 {
            return Err(ConfigError::ZeroTokenTtl);
        }
        if self.token_ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(ConfigError::TokenTtlTooLong {
                max: MAX_TOKEN_TTL_SECONDS,
            });
        }
        Ok(())
    }

    /// Build a codec for the configured key.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn codec(&self) -> Result<TokenCodec, ConfigError> {
        self.validate()?;
        Ok(TokenCodec::new(&self.signing_key))
    }
}

/// `limit` requests per `duration_seconds`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LimitConfig {
    pub limit: u32,
    pub duration_seconds: u64,
}

impl LimitConfig {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            duration_seconds: 60,
        }
    }

    fn quota(&self, context: &str) -> Result<Quota, ConfigError> {
        let limit = NonZeroU32::new(self.limit).ok_or_else(|| ConfigError::ZeroLimit {
            context: context.to_owned(),
        })?;
        if self.duration_seconds == 0 {
            return Err(ConfigError::ZeroWindow {
                context: context.to_owned(),
            });
        }
        Ok(Quota::new(limit, Duration::from_secs(self.duration_seconds)))
    }
}

/// Per-method quotas for one route template
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteLimitConfig {
    pub path: String,
    pub methods: BTreeMap<String, LimitConfig>,
}

/// Rate limit settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub authenticated_default: LimitConfig,
    pub anonymous_default: LimitConfig,
    /// Consulted in order; the first path-and-method match wins
    pub rules: Vec<RouteLimitConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            authenticated_default: LimitConfig::per_minute(DEFAULT_AUTHENTICATED_LIMIT.get()),
            anonymous_default: LimitConfig::per_minute(DEFAULT_ANONYMOUS_LIMIT.get()),
            rules: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Validate and flatten into a registry. Rules keep their declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for zero limits or windows, unknown methods, or
    /// templates that do not compile.
    pub fn registry(&self) -> Result<RateLimitRegistry, ConfigError> {
        let mut registry = RateLimitRegistry::new(
            self.authenticated_default
                .quota("rate_limits.authenticated_default")?,
            self.anonymous_default.quota("rate_limits.anonymous_default")?,
        );

        for route in &self.rules {
            for (name, limit) in &route.methods {
                let method = parse_method(name).ok_or_else(|| ConfigError::InvalidMethod {
                    path: route.path.clone(),
                    method: name.clone(),
                })?;
                let quota = limit.quota(&format!("rate_limits.rules[{} {}]", name, route.path))?;
                registry = registry.with_rule(RateLimitRule::new(
                    &route.path,
                    method,
                    quota.limit(),
                    quota.window(),
                )?);
            }
        }
        Ok(registry)
    }
}

fn parse_method(name: &str) -> Option<Method> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }
    Method::from_bytes(upper.as_bytes()).ok()
}
