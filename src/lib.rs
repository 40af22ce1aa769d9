//! # media-relay
//!
//! Resilient relay and batch download service for media behind short-lived
//! URLs.
//!
//! ## Design Philosophy
//!
//! - **Re-resolve on every attempt** - direct URLs expire, so each retry asks
//!   the resolver for a fresh descriptor and resumes where the last one stopped
//! - **Isolated failures** - one failing item never stops its siblings
//! - **Event-driven** - batch progress is a finite stream of typed events
//! - **Graceful degradation** - missing `yt-dlp` or `ffmpeg` turn into clear
//!   `NotSupported` errors instead of startup failures
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_relay::{Config, MediaRelay};
//! use media_relay::types::BatchRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MediaRelay::new(Config::default()).await?;
//!
//!     let mut events = service.execute_batch(BatchRequest::new(["dQw4w9WgXcQ", "9bZkp7q19f0"]))?;
//!     while let Some(event) = events.next_event().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Batch orchestration, job execution and working directories
pub mod batch;
/// Periodic removal of abandoned working directories
pub mod cleanup;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Event bus and collaborator loggers
pub mod events;
/// Archive packaging
pub mod packager;
/// Retrying, resuming stream relay
pub mod relay;
/// Source resolution
pub mod resolver;
/// Retry policy and backoff
pub mod retry;
/// Service facade
pub mod service;
/// Time-range trimming
pub mod transcoder;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use batch::{BatchOrchestrator, BatchSession, SessionRegistry};
pub use config::Config;
pub use error::{ApiError, Error, ErrorDetail, ErrorKind, RelayError, Result, ToHttpStatus};
pub use events::{EventStream, JobLogger};
pub use packager::{ArchivePackager, ZipPackager};
pub use relay::{RelayStream, StreamRelay};
pub use resolver::{Resolver, UnavailableResolver, YtDlpResolver};
pub use service::{Collaborators, MediaRelay, SingleBody, SingleDownload};
pub use transcoder::{FfmpegTranscoder, NoOpTranscoder, Transcoder};
pub use types::{
    BatchRequest, Capabilities, DownloadJob, DownloadMode, Event, JobStatus, PlayableDescriptor,
    RelayRequest, TrimRange,
};

/// Helper function to run the service with graceful signal handling.
///
/// Waits for a termination signal and then calls the service's `shutdown()`
/// method, which cancels running batches, stops the cleanup task and lets a
/// spawned API server drain.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_relay::{Config, MediaRelay, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = Arc::new(MediaRelay::new(Config::default()).await?);
///     let _api = service.spawn_api_server();
///
///     // Run with automatic signal handling
///     run_with_shutdown(service).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: std::sync::Arc<MediaRelay>) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
