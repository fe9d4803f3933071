//! HTTP routes
//!
//! [`ROUTES`] declares every route with its access level and is the source
//! of the admission route table. The router tests check that each declared
//! route reaches a handler.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use http::header::AUTHORIZATION;
use http::{HeaderValue, Method};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use tracker_admission::{
    Access, AdmissionError, CacheStats, Principal, RevocationCache, RouteTable, TemplateError,
    TokenCodec,
};

use crate::error::ApiError;
use crate::store::InMemoryUserStore;

pub const REGISTER: &str = "/api/v1/user/register";
pub const RESET_PASSWORD: &str = "/api/v1/user/resetPassword";
pub const JOB_INTERVIEW: &str = "/api/v1/jobs/{jobId}/interview";
pub const CACHE_STATS: &str = "/admin/cache/stats";
pub const HEALTH: &str = "/health";

/// Every route the server exposes: (method, template, access)
pub const ROUTES: &[(Method, &str, Access)] = &[
    (Method::POST, REGISTER, Access::Public),
    (Method::POST, RESET_PASSWORD, Access::Protected),
    (Method::GET, JOB_INTERVIEW, Access::Protected),
    (Method::GET, CACHE_STATS, Access::Protected),
    (Method::GET, HEALTH, Access::Public),
];

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub codec: Arc<TokenCodec>,
    pub revocation: Arc<RevocationCache>,
    pub users: Arc<InMemoryUserStore>,
    /// Lifetime of tokens issued at registration and reset
    pub token_ttl: Duration,
}

impl AppState {
    /// Issue a token at `version` and prime the cache with it
    fn issue(&self, user_id: &str, version: u64) -> Result<HeaderValue, ApiError> {
        let token = self.codec.issue(user_id, version, self.token_ttl)?;
        self.revocation.put(user_id, version);
        HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| AdmissionError::Signing(e.to_string()).into())
    }
}

/// Admission route table for [`ROUTES`]
///
/// # Errors
///
/// Only if a template in [`ROUTES`] fails to compile.
pub fn route_table() -> Result<RouteTable, TemplateError> {
    ROUTES
        .iter()
        .try_fold(RouteTable::new(), |table, (method, template, access)| {
            table.route(method.clone(), template, *access)
        })
}

/// Axum router serving every entry of [`ROUTES`]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(REGISTER, post(register))
        .route(RESET_PASSWORD, post(reset_password))
        .route(JOB_INTERVIEW, get(job_interview))
        .route(CACHE_STATS, get(cache_stats))
        .route(HEALTH, get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    if !request.email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".into()));
    }

    let user = state.users.register(&request.name, &request.email)?;
    let bearer = state.issue(&user.id, user.token_version)?;

    Ok((
        [(AUTHORIZATION, bearer)],
        Json(json!({
            "message": "user registered successfully",
            "userId": user.id,
        })),
    )
        .into_response())
}

/// Rotate the caller's credential: every earlier token stops working
async fn reset_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, ApiError> {
    let user_id = principal.subject();
    let version = state.users.bump_version(user_id)?;
    state.revocation.invalidate(user_id);
    let bearer = state.issue(user_id, version)?;

    info!(user_id, version, "credential generation rotated");
    Ok((
        [(AUTHORIZATION, bearer)],
        Json(json!({ "message": "Password has been reset successfully" })),
    )
        .into_response())
}

async fn job_interview(
    Path(job_id): Path<String>,
    Extension(principal): Extension<Principal>,
) -> Json<serde_json::Value> {
    Json(json!({
        "jobId": job_id,
        "userId": principal.subject(),
    }))
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.revocation.stats())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
