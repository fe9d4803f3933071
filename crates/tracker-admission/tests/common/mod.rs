//! Common test utilities for integration tests
//!
//! Provides an in-memory revocation source, a fully wired admission
//! pipeline over a small route table, and request builders.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use dashmap::DashMap;
use http::{Method, Request, Response};
use secrecy::SecretString;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt, service_fn};

use tracker_admission::tower::AdmissionLayer;
use tracker_admission::{
    Admission, AdmissionPipeline, AuthenticationGate, Principal, RateLimitRegistry, RateLimiter,
    RevocationCache, RevocationSource, RouteTable, SourceError, TokenCodec,
};

pub const SIGNING_KEY: &str = "integration-test-signing-key";

pub const REGISTER: &str = "/api/v1/user/register";
pub const RESET_PASSWORD: &str = "/api/v1/user/resetPassword";
pub const INTERVIEW: &str = "/api/v1/jobs/{jobId}/interview";
pub const HEALTH: &str = "/health";

/// In-memory user generations with failure injection
#[derive(Default)]
pub struct UserVersions {
    versions: DashMap<String, u64>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl UserVersions {
    pub fn set(&self, user_id: &str, version: u64) {
        self.versions.insert(user_id.to_owned(), version);
    }

    /// Increment and return the new generation (what a password reset does)
    pub fn bump(&self, user_id: &str) -> u64 {
        let mut entry = self.versions.entry(user_id.to_owned()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl RevocationSource for UserVersions {
    async fn current_version(&self, user_id: &str) -> Result<u64, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("user store timed out".into()));
        }
        self.versions
            .get(user_id)
            .map(|v| *v)
            .ok_or_else(|| SourceError::UnknownUser(user_id.to_owned()))
    }
}

/// Everything a test needs to drive admission end to end
pub struct Harness {
    pub codec: Arc<TokenCodec>,
    pub users: Arc<UserVersions>,
    pub revocation: Arc<RevocationCache>,
    pub pipeline: Arc<AdmissionPipeline>,
    /// Number of requests that reached the inner service
    pub reached: Arc<AtomicUsize>,
}

pub fn routes() -> RouteTable {
    RouteTable::new()
        .public(Method::POST, REGISTER)
        .and_then(|t| t.public(Method::GET, HEALTH))
        .and_then(|t| t.protected(Method::POST, RESET_PASSWORD))
        .and_then(|t| t.protected(Method::GET, INTERVIEW))
        .expect("test routes compile")
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(&SecretString::new(SIGNING_KEY.to_owned()))
}

impl Harness {
    pub fn new() -> Self {
        Self::with(RateLimitRegistry::default(), None)
    }

    pub fn with(registry: RateLimitRegistry, renewal: Option<Duration>) -> Self {
        let codec = Arc::new(codec());
        let users = Arc::new(UserVersions::default());
        users.set("alice", 1);
        users.set("bob", 1);

        let revocation = Arc::new(RevocationCache::new(users.clone()));
        let mut gate = AuthenticationGate::new(Arc::clone(&codec), Arc::clone(&revocation));
        if let Some(ttl) = renewal {
            gate = gate.with_renewal(ttl);
        }
        let pipeline = AdmissionPipeline::new(routes(), gate, RateLimiter::new(registry));

        Self {
            codec,
            users,
            revocation,
            pipeline: Arc::new(pipeline),
            reached: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Token for `user` at their current generation
    pub fn token(&self, user: &str, version: u64) -> String {
        self.codec
            .issue(user, version, Duration::from_secs(600))
            .expect("token issues")
    }

    /// The admission layer in front of an echo service.
    ///
    /// The echo body is the principal's subject (or `anonymous`) and the
    /// admitted route template.
    pub fn service(
        &self,
    ) -> BoxCloneService<Request<String>, Response<String>, Infallible> {
        let reached = Arc::clone(&self.reached);
        let inner = service_fn(move |req: Request<String>| {
            let reached = Arc::clone(&reached);
            async move {
                reached.fetch_add(1, Ordering::SeqCst);
                let who = req
                    .extensions()
                    .get::<Principal>()
                    .map_or("anonymous".to_owned(), |p| p.subject().to_owned());
                let route = req
                    .extensions()
                    .get::<Admission>()
                    .and_then(|a| a.route_template.clone())
                    .unwrap_or_default();
                Ok::<_, Infallible>(Response::new(format!("{who} {route}")))
            }
        });
        AdmissionLayer::from_arc(Arc::clone(&self.pipeline))
            .layer(inner)
            .boxed_clone()
    }

    pub async fn send(&self, req: Request<String>) -> Response<String> {
        self.service().oneshot(req).await.expect("infallible")
    }

    pub fn reached(&self) -> usize {
        self.reached.load(Ordering::SeqCst)
    }
}

/// Build a request from `peer` with an optional bearer token
pub fn request(method: Method, path: &str, token: Option<&str>, peer: &str) -> Request<String> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let mut req = builder.body(String::new()).expect("valid request");
    let addr: SocketAddr = format!("{peer}:40000").parse().expect("valid peer");
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

pub fn message(response: &Response<String>) -> String {
    let body: serde_json::Value = serde_json::from_str(response.body()).expect("json body");
    body["message"].as_str().unwrap_or_default().to_owned()
}
