//! Single-item download handler.

use crate::api::AppState;
use crate::error::{Error, Result};
use crate::types::RelayRequest;
use crate::utils::content_disposition;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::Response,
};

/// POST /download - Download one item
///
/// Without a time range the origin bytes are relayed as they arrive. With one,
/// the item is fetched, trimmed and then sent with a `Content-Length`.
#[utoipa::path(
    post,
    path = "/download",
    tag = "download",
    request_body = RelayRequest,
    responses(
        (status = 200, description = "Media bytes", content_type = "application/octet-stream"),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 501, description = "Trimming not available", body = crate::error::ApiError),
        (status = 502, description = "Resolver or origin failure", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError),
        (status = 504, description = "Retries exhausted", body = crate::error::ApiError)
    )
)]
pub async fn download(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> Result<Response> {
    tracing::info!(url = %request.url, mode = ?request.mode, "Download request");

    let download = state.service.relay_single(request).await?;
    let disposition = content_disposition(&download.filename);
    let content_type = download.content_type;
    let content_length = download.content_length;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition);
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    let body = Body::from_stream(download.into_byte_stream(state.config.relay.chunk_size));
    builder
        .body(body)
        .map_err(|e| Error::ApiServerError(format!("failed to build response: {e}")))
}
