//! Tower middleware integration
//!
//! [`AdmissionLayer`] wraps any `Service<http::Request<B>>` whose response
//! body can be built from a `String` (axum's `Body` qualifies).
//!
//! ```rust,ignore
//! use axum::{Router, routing::get};
//! use tracker_admission::tower::AdmissionLayer;
//!
//! let app: Router = Router::new()
//!     .route("/api/v1/jobs/{jobId}/interview", get(interview))
//!     .layer(AdmissionLayer::new(pipeline));
//! ```

mod layer;
mod service;

pub use layer::AdmissionLayer;
pub use service::AdmissionService;
