//! OpenAPI documentation and schema generation
//!
//! The document is generated at compile time with utoipa and served at
//! `/openapi.json`.

use utoipa::OpenApi;

/// OpenAPI documentation for the media-relay REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "media-relay REST API",
        version = "0.1.0",
        description = "Relays media from short-lived origin URLs, with batch downloads packaged into archives and progress streamed as server-sent events",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:5000", description = "Local development server")
    ),
    paths(
        crate::api::routes::download,
        crate::api::routes::download_playlist,
        crate::api::routes::retrieve_artifact,
        crate::api::routes::root,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::types::RelayRequest,
        crate::types::BatchRequest,
        crate::types::DownloadMode,
        crate::types::Event,
        crate::types::LogLevel,
        crate::types::JobStatus,
        crate::types::DownloadJob,
        crate::types::Capabilities,
        crate::error::ErrorKind,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "download", description = "Single and batch downloads, artifact retrieval"),
        (name = "system", description = "Banner, health check and OpenAPI document"),
    )
)]
pub struct ApiDoc;
