//! Artifact retrieval handler.

use crate::api::AppState;
use crate::error::{Error, Result};
use crate::utils::{content_disposition, content_type_for};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// GET /download/*path - Retrieve a produced artifact
///
/// Only regular files below the download root are served; anything else is a
/// 404. Retrieval has no side effects and may be repeated.
#[utoipa::path(
    get,
    path = "/download/{path}",
    tag = "download",
    params(
        ("path" = String, Path, description = "Path relative to the download root")
    ),
    responses(
        (status = 200, description = "Artifact bytes", content_type = "application/zip"),
        (status = 404, description = "No such artifact", body = crate::error::ApiError)
    )
)]
pub async fn retrieve_artifact(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response> {
    let file_path = state.service.artifact(&path)?;
    let file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|_| Error::NotFound(path.clone()))?;
    let len = file.metadata().await?.len();

    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());
    let content_type = file_path
        .extension()
        .and_then(|e| e.to_str())
        .map(content_type_for)
        .unwrap_or("application/octet-stream");

    tracing::info!(path = %file_path.display(), bytes = len, "Serving artifact");

    let body = Body::from_stream(ReaderStream::with_capacity(
        file,
        state.config.relay.chunk_size,
    ));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .header(header::CONTENT_DISPOSITION, content_disposition(&filename))
        .body(body)
        .map_err(|e| Error::ApiServerError(format!("failed to build response: {e}")))
}
