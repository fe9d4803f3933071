//! Tower Service implementation for admission control
//!
//! For each `http::Request<B>` the service:
//! - runs the [`AdmissionPipeline`] on the request head
//! - on rejection, answers with the error's status and JSON body without
//!   calling the inner service
//! - on acceptance, inserts the [`Principal`](crate::Principal) (when
//!   present) and the [`Admission`] into request extensions, calls the inner
//!   service, and attaches a renewed token to the response's `Authorization`
//!   header unless the handler already set one (a rotated credential wins)

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::HeaderValue;
use http::header::AUTHORIZATION;
use tower_service::Service;
use tracing::warn;

use crate::pipeline::{Admission, AdmissionPipeline};

/// Tower Service that admits or rejects requests before the inner service
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    pipeline: Arc<AdmissionPipeline>,
}

impl<S> AdmissionService<S> {
    pub fn new(inner: S, pipeline: Arc<AdmissionPipeline>) -> Self {
        Self { inner, pipeline }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for AdmissionService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let admission = match pipeline.admit(&parts).await {
                Ok(admission) => admission,
                Err(err) => return Ok(err.to_response()),
            };

            let renewed_token = admission.renewed_token.clone();
            if let Some(principal) = admission.principal.clone() {
                parts.extensions.insert(principal);
            }
            parts.extensions.insert::<Admission>(admission);

            let mut response = inner.call(http::Request::from_parts(parts, body)).await?;

            if let Some(token) = renewed_token
                && !response.headers().contains_key(AUTHORIZATION)
            {
                match HeaderValue::from_str(&format!("Bearer {token}")) {
                    Ok(value) => {
                        response.headers_mut().insert(AUTHORIZATION, value);
                    }
                    Err(e) => warn!(error = %e, "renewed token is not a valid header value"),
                }
            }
            Ok(response)
        })
    }
}
