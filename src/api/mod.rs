//! REST API server module
//!
//! Exposes single downloads, batch downloads streamed as server-sent events,
//! artifact retrieval and an OpenAPI document.

use crate::{Config, MediaRelay, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Downloads
/// - `POST /download` - Single item, relayed or trimmed
/// - `POST /downloadplaylist` - Batch, answered with `text/event-stream`
/// - `GET /download/*path` - Retrieve a produced artifact
///
/// ## System
/// - `GET /` - Liveness banner
/// - `GET /health` - Health check with selected collaborators
/// - `GET /openapi.json` - OpenAPI specification
pub fn create_router(service: Arc<MediaRelay>, config: Arc<Config>) -> Router {
    let state = AppState::new(service, config.clone());

    let router = Router::new()
        // Downloads
        .route("/download", post(routes::download))
        .route("/downloadplaylist", post(routes::download_playlist))
        .route("/download/*path", get(routes::retrieve_artifact))
        // System
        .route("/", get(routes::root))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.server.cors_enabled {
        router.layer(build_cors_layer(&config.server.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin. All methods and headers are
/// allowed either way.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address
///
/// Runs until the service's shutdown token is cancelled, then stops accepting
/// connections and lets in-flight responses drain.
///
/// # Example
///
/// ```no_run
/// use media_relay::{Config, MediaRelay};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let service = Arc::new(MediaRelay::new((*config).clone()).await?);
///
/// // Blocks until shutdown
/// media_relay::api::start_api_server(service, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(service: Arc<MediaRelay>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.server.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let shutdown = service.shutdown_token();
    let app = create_router(service, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
