//! Tower Layer implementation for admission control

use std::sync::Arc;
use tower::Layer;

use super::service::AdmissionService;
use crate::pipeline::AdmissionPipeline;

/// Tower Layer that runs the admission pipeline in front of a service
///
/// Rejected requests are answered directly and never reach the inner
/// service.
///
/// # Example
///
/// ```rust,ignore
/// use axum::Router;
/// use tracker_admission::tower::AdmissionLayer;
///
/// let app = Router::new()
///     .route("/health", get(health))
///     .layer(AdmissionLayer::new(pipeline));
/// ```
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    pipeline: Arc<AdmissionPipeline>,
}

impl AdmissionLayer {
    pub fn new(pipeline: AdmissionPipeline) -> Self {
        Self::from_arc(Arc::new(pipeline))
    }

    /// Create a layer from a shared pipeline
    pub fn from_arc(pipeline: Arc<AdmissionPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<AdmissionPipeline> {
        &self.pipeline
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService::new(inner, Arc::clone(&self.pipeline))
    }
}
