//! # Tracker Server
//!
//! HTTP front end of the interview tracker API. Every request passes the
//! [`tracker_admission`] pipeline (authentication, then rate limiting)
//! before it reaches a handler.
//!
//! ## Layers, outermost first
//!
//! 1. `TraceLayer` - one span per request
//! 2. `CorsLayer` - origins from `server.cors_origins`
//! 3. `AdmissionLayer` - 401 / 429 / 503 short-circuits
//! 4. the [`routes`] router
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let config = ServerConfig::load(Some(Path::new("config/tracker.toml")))?;
//! config.logging.init()?;
//! let app = build_app(&config, Arc::new(InMemoryUserStore::new()))?;
//! serve(&config, app.router).await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracker_admission::tower::AdmissionLayer;
use tracker_admission::{AdmissionPipeline, AuthenticationGate, RateLimiter, RevocationCache};

pub use config::{ConfigError, HttpConfig, LoggingConfig, ServerConfig};
pub use error::ApiError;
pub use routes::AppState;
pub use store::{InMemoryUserStore, StoreError, UserRecord};

/// A fully wired application
pub struct App {
    pub router: Router,
    /// Handler state, shared with the admission pipeline
    pub state: AppState,
    pub pipeline: Arc<AdmissionPipeline>,
}

/// Wire configuration, user store and routes into a router.
///
/// # Errors
///
/// Returns [`ConfigError`] if the auth, rate limit or CORS settings are
/// invalid.
pub fn build_app(config: &ServerConfig, users: Arc<InMemoryUserStore>) -> Result<App, ConfigError> {
    let codec = Arc::new(config.auth.codec()?);
    let revocation = Arc::new(RevocationCache::new(users.clone()));

    let mut gate = AuthenticationGate::new(Arc::clone(&codec), Arc::clone(&revocation));
    if config.auth.renew_tokens {
        gate = gate.with_renewal(config.auth.token_ttl());
    }
    let limiter = RateLimiter::new(config.rate_limits.registry()?);
    let routes = routes::route_table().map_err(tracker_admission::ConfigError::from)?;

    let pipeline = Arc::new(
        AdmissionPipeline::new(routes, gate, limiter)
            .trust_forwarded_headers(config.server.trust_forwarded_headers),
    );

    let state = AppState {
        codec,
        revocation,
        users,
        token_ttl: config.auth.token_ttl(),
    };

    let router = routes::router(state.clone())
        .layer(AdmissionLayer::from_arc(Arc::clone(&pipeline)))
        .layer(cors_layer(&config.server.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    Ok(App {
        router,
        state,
        pipeline,
    })
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigError> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| ConfigError::InvalidOrigin {
                origin: origin.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        // Renewed and rotated tokens travel back in this header
        .expose_headers([AUTHORIZATION]))
}

/// Bind and serve until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(config: &ServerConfig, router: Router) -> anyhow::Result<()> {
    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "tracker server listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("tracker server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl+C received, initiating shutdown"),
        () = terminate => info!("SIGTERM received, initiating shutdown"),
    }
}
