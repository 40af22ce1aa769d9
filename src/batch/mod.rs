//! Batch download orchestration
//!
//! [`BatchOrchestrator::execute`] validates a [`BatchRequest`], then runs one
//! [`JobRunner`] per item on a pool bounded by `max_concurrent_jobs`. Every job
//! reports on the batch's event bus; the orchestrator adds batch-level status
//! lines, packages the working directory once every job has terminated and
//! finishes with a single `completed` or `error` event before the stream
//! closes.
//!
//! ```text
//! validate ─▶ session ─▶ jobs (≤ W running) ─▶ "k/N videos completed" ...
//!                                   │
//!                      all joined ──┴─▶ "Creating ZIP archive..." ─▶ completed | error
//! ```

mod job;
pub mod progress;
mod session;

pub use job::{JobContext, JobRunner};
pub(crate) use job::write_stream_to_file;
pub use session::{BatchSession, SESSION_DIR_PREFIX, SessionGuard, SessionRegistry};

use crate::config::{Config, DownloadConfig};
use crate::error::{Error, Result};
use crate::events::{self, EventPublisher, EventStream};
use crate::packager::ArchivePackager;
use crate::relay::StreamRelay;
use crate::transcoder::Transcoder;
use crate::types::{BatchRequest, DownloadJob, DownloadMode, Event, JobStatus};
use crate::utils::{expand_source_ref, get_unique_path, resolve_output_dir, retrieval_url};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Format selector used for audio-only batches
const AUDIO_SELECTOR: &str = "bestaudio/best";

/// Collaborators shared by every batch
#[derive(Clone)]
pub struct BatchServices {
    /// Stream relay (owns the resolver and retry policy)
    pub relay: StreamRelay,
    /// Trimming collaborator
    pub transcoder: Arc<dyn Transcoder>,
    /// Archive collaborator
    pub packager: Arc<dyn ArchivePackager>,
    /// Working directories in use
    pub sessions: SessionRegistry,
}

/// Bounded-concurrency batch runner
#[derive(Clone)]
pub struct BatchOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    services: BatchServices,
    download: DownloadConfig,
    output_root: PathBuf,
    chunk_size: usize,
}

impl BatchOrchestrator {
    /// Create an orchestrator for the given configuration
    pub fn new(config: &Config, services: BatchServices) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                services,
                download: config.download.clone(),
                output_root: config.download.download_dir.clone(),
                chunk_size: config.relay.chunk_size,
            }),
        }
    }

    /// Validate `request` and start it, returning the batch's event stream
    ///
    /// Validation failures are returned before any event is produced. The
    /// batch runs under a child of `shutdown`; dropping the returned stream
    /// cancels it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for an empty item list, a blank item or a
    /// `download_path` outside the output root.
    pub fn execute(&self, request: BatchRequest, shutdown: &CancellationToken) -> Result<EventStream> {
        if request.video_ids.is_empty() {
            return Err(Error::InvalidRequest("video_ids must not be empty".into()));
        }
        if let Some(position) = request.video_ids.iter().position(|id| id.trim().is_empty()) {
            return Err(Error::InvalidRequest(format!(
                "video_ids[{position}] must not be blank"
            )));
        }
        let output_dir = resolve_output_dir(&self.inner.output_root, request.download_path.as_deref())?;

        let cancel = shutdown.child_token();
        let (publisher, stream) = events::channel(&cancel);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run(request, output_dir, publisher, cancel).await;
        });

        Ok(stream)
    }
}

impl OrchestratorInner {
    async fn run(
        &self,
        request: BatchRequest,
        output_dir: PathBuf,
        publisher: EventPublisher,
        cancel: CancellationToken,
    ) {
        let total = request.video_ids.len();
        let jobs: Vec<DownloadJob> = request
            .video_ids
            .iter()
            .enumerate()
            .map(|(index, item)| {
                DownloadJob::new(index, expand_source_ref(&self.download.item_url_template, item))
            })
            .collect();

        let mut session = match BatchSession::create(
            &output_dir,
            request.playlist_title.as_deref(),
            jobs.clone(),
            &self.services.sessions,
        ) {
            Ok(session) => session,
            Err(e) => {
                error!(output_dir = %output_dir.display(), error = %e, "Failed to create batch session");
                publisher.error(format!("Failed to prepare playlist download: {e}"), None);
                return;
            }
        };

        info!(
            batch_id = session.id(),
            jobs = total,
            width = self.download.max_concurrent_jobs,
            source = request.url.as_deref().unwrap_or(""),
            "Batch started"
        );
        publisher.status(format!("Starting playlist download ({total} videos)..."), None);

        let format_selector = match request.mode {
            DownloadMode::Video => self.download.batch_format.clone(),
            DownloadMode::Audio => AUDIO_SELECTOR.to_string(),
        };
        let ctx = Arc::new(JobContext {
            relay: self.services.relay.clone(),
            transcoder: self.services.transcoder.clone(),
            publisher: publisher.clone(),
            working_dir: session.working_dir().to_path_buf(),
            format_selector: Some(format_selector),
            trim: request.trim(),
            progress_interval: self.download.progress_interval,
            chunk_size: self.chunk_size,
            cancel: cancel.clone(),
        });

        self.run_jobs(jobs, &ctx, &mut session, &publisher, &cancel).await;
        drop(ctx);

        let succeeded = session
            .jobs()
            .iter()
            .filter(|job| job.status == JobStatus::Succeeded)
            .count();
        info!(
            batch_id = session.id(),
            succeeded,
            failed = total - succeeded,
            "All jobs finished"
        );

        if cancel.is_cancelled() {
            warn!(batch_id = session.id(), "Batch cancelled, skipping packaging");
            publisher.error("Playlist download was cancelled", None);
            return;
        }

        publisher.status("Creating ZIP archive...", None);
        match self.package(&session, &cancel).await {
            Ok(event) => {
                publisher.publish(event);
                if let Err(e) = session.finish() {
                    warn!(error = %e, "Failed to remove batch working directory");
                }
            }
            Err(e) => {
                error!(batch_id = session.id(), error = %e, "Packaging failed");
                publisher.error(format!("Failed to create ZIP archive: {e}"), None);
            }
        }
    }

    /// Run every job, at most `max_concurrent_jobs` at a time
    async fn run_jobs(
        &self,
        jobs: Vec<DownloadJob>,
        ctx: &Arc<JobContext>,
        session: &mut BatchSession,
        publisher: &EventPublisher,
        cancel: &CancellationToken,
    ) {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.download.max_concurrent_jobs));
        let mut set = JoinSet::new();

        for job in jobs {
            let runner = JobRunner::new(ctx.clone());
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(_permit) => runner.run(job).await,
                    None => runner.skip(job, &Error::Cancelled),
                }
            });
        }

        let mut completed = 0;
        while let Some(joined) = set.join_next().await {
            completed += 1;
            match joined {
                Ok(job) => {
                    debug!(video_index = job.index, status = ?job.status, "Job joined");
                    session.record(job);
                }
                Err(e) => error!(error = %e, "Job task panicked"),
            }
            publisher.status(format!("{completed}/{total} videos completed"), None);
        }
    }

    async fn package(&self, session: &BatchSession, cancel: &CancellationToken) -> Result<Event> {
        let archive_path = get_unique_path(&session.archive_path())?;
        let packager = &self.services.packager;
        debug!(
            batch_id = session.id(),
            archive = %archive_path.display(),
            packager = packager.name(),
            "Packaging batch outputs"
        );

        let archive = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            packaged = packager.package(session.working_dir(), &archive_path) => packaged?,
        };

        let archive_name = file_name(&archive.path);
        let zip_url = retrieval_url(&self.output_root, &archive.path)?;
        info!(
            batch_id = session.id(),
            archive = %archive.path.display(),
            entries = archive.entries.len(),
            "Batch packaged"
        );

        Ok(Event::Completed {
            message: "Playlist download finished!".into(),
            zip_url,
            archive_name,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
