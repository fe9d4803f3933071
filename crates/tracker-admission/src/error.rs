//! Admission error types and their HTTP rendering.

use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use thiserror::Error;

use crate::rate_limit::{Caller, RateLimitInfo};

/// Why a request was not admitted.
///
/// Every variant maps to exactly one HTTP status through [`AdmissionError::status`]
/// and to a stable, client-safe message through [`AdmissionError::reason`].
/// Internal detail carried by the infrastructure variants is only logged.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// No bearer credential on a protected route
    #[error("missing token")]
    MissingToken,

    /// Credential present but not a parseable token
    #[error("malformed token")]
    MalformedToken,

    /// Token signature does not verify under the signing key
    #[error("invalid signature")]
    BadSignature,

    /// Token `exp` lies in the past
    #[error("expired token")]
    Expired,

    /// Token generation no longer matches the user's current generation
    #[error("stale token")]
    StaleToken,

    /// Token bucket for this caller and route is empty
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(RateLimitInfo),

    /// The revocation source could not answer; requests fail closed
    #[error("revocation source unavailable: {0}")]
    RevocationUnavailable(String),

    /// Token could not be signed
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl AdmissionError {
    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::MalformedToken
            | Self::BadSignature
            | Self::Expired
            | Self::StaleToken => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::RevocationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Never includes internal detail.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing token",
            Self::MalformedToken => "malformed token",
            Self::BadSignature => "invalid signature",
            Self::Expired => "expired token",
            Self::StaleToken => "stale token",
            Self::RateLimitExceeded(info) => match info.caller {
                Caller::Authenticated => "rate limit exceeded, try again later",
                Caller::Anonymous => {
                    "rate limit exceeded for unauthenticated users, try again later"
                }
            },
            Self::RevocationUnavailable(_) => "authentication backend unavailable",
            Self::Signing(_) => "internal error",
        }
    }

    /// Whether the failure was the caller's credential rather than throttling
    /// or an unreachable backing store.
    pub fn is_authentication_failure(&self) -> bool {
        self.status() == StatusCode::UNAUTHORIZED
    }

    /// Render this rejection as an HTTP response with a `{"message": ...}` JSON body.
    ///
    /// Generic over the body so the tower service can answer without knowing the
    /// framework; any body constructible from a `String` works.
    pub fn to_response<B: From<String>>(&self) -> http::Response<B> {
        let body = serde_json::json!({ "message": self.reason() }).to_string();
        let mut response = http::Response::new(B::from(body));
        *response.status_mut() = self.status();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if self.status() == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        if let Self::RateLimitExceeded(info) = self {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(info.retry_after_secs()));
        }
        response
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        self.to_response()
    }
}

/// Failure reported by a [`RevocationSource`](crate::revocation::RevocationSource).
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The user no longer exists; tokens naming it are treated as stale
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The backing store could not be reached
    #[error("revocation store unavailable: {0}")]
    Unavailable(String),
}

impl From<SourceError> for AdmissionError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::UnknownUser(_) => Self::StaleToken,
            SourceError::Unavailable(detail) => Self::RevocationUnavailable(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn throttled(caller: Caller) -> AdmissionError {
        AdmissionError::RateLimitExceeded(RateLimitInfo {
            retry_after: Duration::from_millis(11_200),
            limit: 5,
            window: Duration::from_secs(60),
            caller,
        })
    }

    #[test]
    fn test_credential_failures_are_unauthorized() {
        for err in [
            AdmissionError::MissingToken,
            AdmissionError::MalformedToken,
            AdmissionError::BadSignature,
            AdmissionError::Expired,
            AdmissionError::StaleToken,
        ] {
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{err}");
            assert!(err.is_authentication_failure());
        }
    }

    #[test]
    fn test_unavailable_source_fails_closed_with_5xx() {
        let err = AdmissionError::from(SourceError::Unavailable("connection refused".into()));
        assert!(err.status().is_server_error());
        assert_eq!(err.reason(), "authentication backend unavailable");
    }

    #[test]
    fn test_unknown_user_is_stale() {
        let err = AdmissionError::from(SourceError::UnknownUser("u-1".into()));
        assert!(matches!(err, AdmissionError::StaleToken));
    }

    #[test]
    fn test_rate_limit_response_has_retry_after() {
        let response: http::Response<String> = throttled(Caller::Authenticated).to_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        // 11.2s rounds up to whole seconds
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
        assert!(response.body().contains("rate limit exceeded"));
    }

    #[test]
    fn test_anonymous_throttle_message_differs() {
        let anon = throttled(Caller::Anonymous);
        let auth = throttled(Caller::Authenticated);
        assert_ne!(anon.reason(), auth.reason());
        assert!(anon.reason().contains("unauthenticated"));
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = AdmissionError::RevocationUnavailable("db password rejected".into());
        let response: http::Response<String> = err.to_response();
        assert!(!response.body().contains("password"));
    }
}
