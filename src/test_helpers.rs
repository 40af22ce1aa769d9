//! Shared test helpers: a scripted resolver, a copying transcoder, a recording
//! logger and an origin server that can break transfers mid-body.

use crate::events::JobLogger;
use crate::resolver::Resolver;
use crate::transcoder::Transcoder;
use crate::types::{PlayableDescriptor, TrimRange};
use crate::{Error, Result};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Resolver that points every item at `<base_url>/media/<item>`
///
/// Items listed in `failing` produce a resolver failure. Each call is counted
/// and appends `?attempt=<n>` so every descriptor is distinct.
pub(crate) struct ScriptedResolver {
    base_url: String,
    container: String,
    failing: HashSet<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            container: "mp4".into(),
            failing: HashSet::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_for<I: IntoIterator<Item = &'static str>>(mut self, items: I) -> Self {
        self.failing = items.into_iter().map(String::from).collect();
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve(
        &self,
        source_ref: &str,
        format_selector: Option<&str>,
        logger: &dyn JobLogger,
    ) -> Result<PlayableDescriptor> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let item = source_ref.rsplit('/').next().unwrap_or(source_ref);
        logger.info(&format!("resolving {item}"));

        if self.failing.contains(item) {
            return Err(Error::Resolver {
                source_ref: source_ref.to_string(),
                reason: "video unavailable".into(),
            });
        }

        let mut descriptor = PlayableDescriptor::new(
            format!("{}/media/{item}?attempt={attempt}", self.base_url),
            self.container.clone(),
        );
        descriptor.title = Some(format!("Title {item}"));
        descriptor.selected_format_id = format_selector.map(String::from);
        Ok(descriptor)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// "Trims" by copying the input, logging one line
pub(crate) struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn trim(
        &self,
        input: &Path,
        output: &Path,
        _range: &TrimRange,
        logger: &dyn JobLogger,
    ) -> Result<()> {
        logger.info("copying");
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

/// Logger that keeps every line in memory
#[derive(Default)]
pub(crate) struct RecordingLogger {
    lines: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl JobLogger for RecordingLogger {
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("info: {message}"));
    }

    fn warn(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("warn: {message}"));
    }

    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("error: {message}"));
    }
}

/// Deterministic, non-repeating test payload
pub(crate) fn payload(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

/// Origin whose first responses break after a number of bytes
pub(crate) struct FlakyOrigin {
    pub(crate) base_url: String,
    state: Arc<OriginState>,
}

struct OriginState {
    body: Bytes,
    broken_responses: AtomicUsize,
    break_after: usize,
    honor_range: bool,
    replacement: Option<Bytes>,
    ranges: Mutex<Vec<Option<String>>>,
}

impl FlakyOrigin {
    /// Start an origin serving `body` at `/media/*`
    ///
    /// The first `broken_responses` responses stop after `break_after` bytes
    /// and abort the connection. With `honor_range`, `Range: bytes=N-` is
    /// answered with `206`; otherwise the full body is always sent.
    pub(crate) async fn start(
        body: Bytes,
        broken_responses: usize,
        break_after: usize,
        honor_range: bool,
    ) -> Self {
        Self::serve(OriginState {
            body,
            broken_responses: AtomicUsize::new(broken_responses),
            break_after,
            honor_range,
            replacement: None,
            ranges: Mutex::new(Vec::new()),
        })
        .await
    }

    /// Origin whose single broken response is followed by a different object
    pub(crate) async fn start_changing(
        body: Bytes,
        break_after: usize,
        honor_range: bool,
        replacement: Bytes,
    ) -> Self {
        Self::serve(OriginState {
            body,
            broken_responses: AtomicUsize::new(1),
            break_after,
            honor_range,
            replacement: Some(replacement),
            ranges: Mutex::new(Vec::new()),
        })
        .await
    }

    async fn serve(state: OriginState) -> Self {
        let state = Arc::new(state);

        let app = Router::new()
            .route("/media/*item", get(serve_media))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// `Range` header of every request received, in order
    pub(crate) fn ranges(&self) -> Vec<Option<String>> {
        self.state.ranges.lock().unwrap().clone()
    }
}

async fn serve_media(State(state): State<Arc<OriginState>>, headers: HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    state.ranges.lock().unwrap().push(range.clone());

    let broken = state
        .broken_responses
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    let object = match (&state.replacement, broken) {
        (Some(replacement), false) => replacement.clone(),
        _ => state.body.clone(),
    };

    let total = object.len();
    let start = match (&range, state.honor_range) {
        (Some(r), true) => r
            .trim_start_matches("bytes=")
            .trim_end_matches('-')
            .parse::<usize>()
            .unwrap_or(0)
            .min(total),
        _ => 0,
    };
    let slice = object.slice(start..);

    let status = if start > 0 {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, slice.len());
    if start > 0 {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, total - 1, total),
        );
    }

    let body = if broken {
        let head = slice.slice(..state.break_after.min(slice.len()));
        let stream = futures::stream::unfold(0u8, move |step| {
            let head = head.clone();
            async move {
                match step {
                    0 => Some((Ok::<Bytes, std::io::Error>(head), 1)),
                    1 => {
                        // Give the server time to flush the head before aborting
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        let reset = std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "origin dropped",
                        );
                        Some((Err(reset), 2))
                    }
                    _ => None,
                }
            }
        });
        Body::from_stream(stream)
    } else {
        Body::from(slice)
    };

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
