//! Ordered admission stages.
//!
//! A request is admitted only if every stage accepts it. Stages run in a
//! fixed order, authentication then rate limiting, and the first rejection
//! ends evaluation: a request with a bad token never consumes a token from
//! any bucket.

use std::sync::Arc;

use async_trait::async_trait;
use http::request::Parts;
use http::{HeaderMap, Method};
use tracing::{debug, warn};

use crate::admission_metrics;
use crate::client::client_address;
use crate::error::AdmissionError;
use crate::gate::AuthenticationGate;
use crate::rate_limit::{Identity, RateLimiter};
use crate::route::{Access, RouteSpec, RouteTable};
use crate::token::Principal;

/// State threaded through the stages for one request.
#[derive(Debug)]
pub struct AdmissionContext<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub client_addr: &'a str,
    /// Registered route the request matched, if any
    pub route: Option<&'a RouteSpec>,
    /// Set by the authentication stage
    pub principal: Option<Principal>,
    /// Set by the authentication stage when renewal is on
    pub renewed_token: Option<String>,
}

impl AdmissionContext<'_> {
    /// Unregistered routes are protected.
    pub fn access(&self) -> Access {
        self.route.map_or(Access::Protected, |r| r.access)
    }

    /// Rate-limit identity: the token subject, or the client address.
    pub fn identity(&self) -> Identity {
        match &self.principal {
            Some(p) => Identity::User(p.subject().to_owned()),
            None => Identity::Anonymous(self.client_addr.to_owned()),
        }
    }
}

/// One admission check.
#[async_trait]
pub trait AdmissionStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Accept (possibly enriching `ctx`) or reject.
    async fn evaluate(&self, ctx: &mut AdmissionContext<'_>) -> Result<(), AdmissionError>;
}

#[async_trait]
impl AdmissionStage for AuthenticationGate {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn evaluate(&self, ctx: &mut AdmissionContext<'_>) -> Result<(), AdmissionError> {
        let outcome = self.authenticate(ctx.headers, ctx.access()).await?;
        ctx.principal = outcome.principal;
        ctx.renewed_token = outcome.renewed_token;
        Ok(())
    }
}

#[async_trait]
impl AdmissionStage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn evaluate(&self, ctx: &mut AdmissionContext<'_>) -> Result<(), AdmissionError> {
        let route = ctx.route.map(|r| r.template.as_str());
        self.check(&ctx.identity(), ctx.path, route, ctx.method)
            .map_err(AdmissionError::RateLimitExceeded)
    }
}

/// What an admitted request carries to its handler (via request extensions).
#[derive(Debug, Clone)]
pub struct Admission {
    pub principal: Option<Principal>,
    pub identity: Identity,
    /// Registered route template, `None` for unregistered paths
    pub route_template: Option<String>,
    /// Token the response should hand back to the client
    pub renewed_token: Option<String>,
}

/// Runs every admission stage, in order, for each request.
pub struct AdmissionPipeline {
    routes: RouteTable,
    stages: Vec<Arc<dyn AdmissionStage>>,
    trust_forwarded_headers: bool,
}

impl std::fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field("routes", &self.routes.routes().len())
            .field("stages", &self.stage_names())
            .field("trust_forwarded_headers", &self.trust_forwarded_headers)
            .finish()
    }
}

impl AdmissionPipeline {
    pub fn new(routes: RouteTable, gate: AuthenticationGate, limiter: RateLimiter) -> Self {
        Self {
            routes,
            stages: vec![Arc::new(gate), Arc::new(limiter)],
            trust_forwarded_headers: false,
        }
    }

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that sets them.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Admit or reject a request from its head.
    ///
    /// # Errors
    ///
    /// The first stage rejection.
    pub async fn admit(&self, parts: &Parts) -> Result<Admission, AdmissionError> {
        let client_addr = client_address(parts, self.trust_forwarded_headers);
        self.admit_with(&parts.method, parts.uri.path(), &parts.headers, &client_addr)
            .await
    }

    /// Admit or reject a request given its pieces and a resolved client address.
    ///
    /// # Errors
    ///
    /// The first stage rejection.
    pub async fn admit_with(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        client_addr: &str,
    ) -> Result<Admission, AdmissionError> {
        let route = self.routes.lookup(path, method);
        let mut ctx = AdmissionContext {
            method,
            path,
            headers,
            client_addr,
            route,
            principal: None,
            renewed_token: None,
        };

        for stage in &self.stages {
            if let Err(err) = stage.evaluate(&mut ctx).await {
                warn!(
                    stage = stage.name(),
                    %method,
                    path,
                    reason = err.reason(),
                    "request rejected"
                );
                admission_metrics::record_rejection(err.reason());
                return Err(err);
            }
        }

        let identity = ctx.identity();
        debug!(%identity, %method, path, "request admitted");
        Ok(Admission {
            principal: ctx.principal,
            identity,
            route_template: route.map(|r| r.template.as_str().to_owned()),
            renewed_token: ctx.renewed_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::revocation::{RevocationCache, RevocationSource};
    use crate::token::TokenCodec;
    use secrecy::SecretString;
    use std::time::Duration;

    struct AlwaysOne;

    #[async_trait]
    impl RevocationSource for AlwaysOne {
        async fn current_version(&self, _user_id: &str) -> Result<u64, SourceError> {
            Ok(1)
        }
    }

    fn pipeline() -> (AdmissionPipeline, Arc<TokenCodec>) {
        let codec = Arc::new(TokenCodec::new(&SecretString::new("pipeline-key".into())));
        let cache = Arc::new(RevocationCache::new(Arc::new(AlwaysOne)));
        let gate = AuthenticationGate::new(Arc::clone(&codec), cache);
        let routes = RouteTable::new()
            .public(Method::GET, "/health")
            .unwrap()
            .protected(Method::GET, "/api/v1/jobs/{jobId}")
            .unwrap();
        (
            AdmissionPipeline::new(routes, gate, RateLimiter::default()),
            codec,
        )
    }

    #[test]
    fn test_stage_order_is_fixed() {
        let (pipeline, _) = pipeline();
        assert_eq!(pipeline.stage_names(), vec!["authentication", "rate-limit"]);
    }

    #[tokio::test]
    async fn test_admission_carries_route_template() {
        let (pipeline, codec) = pipeline();
        let token = codec.issue("alice", 1, Duration::from_secs(60)).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let admission = pipeline
            .admit_with(&Method::GET, "/api/v1/jobs/77", &headers, "127.0.0.1")
            .await
            .unwrap();

        assert_eq!(admission.route_template.as_deref(), Some("/api/v1/jobs/{jobId}"));
        assert_eq!(admission.identity, Identity::User("alice".into()));
    }

    #[tokio::test]
    async fn test_rejected_auth_consumes_no_tokens() {
        let (pipeline, _) = pipeline();
        let headers = HeaderMap::new();

        for _ in 0..20 {
            let result = pipeline
                .admit_with(&Method::GET, "/api/v1/jobs/1", &headers, "10.0.0.1")
                .await;
            assert!(matches!(result, Err(AdmissionError::MissingToken)));
        }

        // Anonymous budget on a public route is untouched
        for _ in 0..5 {
            assert!(
                pipeline
                    .admit_with(&Method::GET, "/health", &headers, "10.0.0.1")
                    .await
                    .is_ok()
            );
        }
    }

    #[tokio::test]
    async fn test_unregistered_route_is_protected() {
        let (pipeline, _) = pipeline();
        let result = pipeline
            .admit_with(&Method::DELETE, "/health", &HeaderMap::new(), "10.0.0.1")
            .await;
        assert!(matches!(result, Err(AdmissionError::MissingToken)));
    }
}
