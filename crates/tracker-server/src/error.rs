//! Handler error type
//!
//! Every error renders as `{"message": ...}`, the same body shape the
//! admission layer uses for its rejections.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;
use tracing::error;
use tracker_admission::AdmissionError;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            Self::Store(StoreError::EmailTaken) => (
                StatusCode::CONFLICT,
                Json(json!({ "message": "email already registered" })),
            )
                .into_response(),
            // The token verified but its subject is gone
            Self::Store(StoreError::UnknownUser(_)) => {
                AdmissionError::StaleToken.into_response()
            }
            Self::Admission(err) => {
                if matches!(err, AdmissionError::Signing(_)) {
                    error!(error = %err, "token issuance failed");
                }
                err.into_response()
            }
        }
    }
}
