//! Batch download handler (server-sent events).

use crate::api::AppState;
use crate::error::Result;
use crate::types::BatchRequest;
use axum::{
    Json,
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio_stream::{Stream, StreamExt};

/// POST /downloadplaylist - Download a batch, streaming its events
///
/// Each event is framed as `data: <json>`. The stream ends after the batch's
/// terminal `completed` or `error` event. Closing the connection cancels the
/// batch.
#[utoipa::path(
    post,
    path = "/downloadplaylist",
    tag = "download",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Batch event stream (text/event-stream)", content_type = "text/event-stream", body = crate::types::Event),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn download_playlist(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>> {
    tracing::info!(
        url = request.url.as_deref().unwrap_or(""),
        videos = request.video_ids.len(),
        "Playlist download request"
    );

    let events = state.service.execute_batch(request)?;
    let stream = events.filter_map(|event| match serde_json::to_string(&event) {
        Ok(json_data) => Some(Ok(SseEvent::default().data(json_data))),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize event to JSON");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
