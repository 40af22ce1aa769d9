//! Execution of a single download job

use super::progress::{ProgressThrottle, TransferMeter};
use crate::error::{Error, Result};
use crate::events::{EventLogger, EventPublisher, JobLogger};
use crate::relay::{RelayStream, StreamRelay};
use crate::transcoder::Transcoder;
use crate::types::{DownloadJob, Event, JobStatus, TrimRange};
use crate::utils::{PARTIAL_SUFFIX, sanitize_filename};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Title used when the resolver reports none
const FALLBACK_TITLE: &str = "video";

/// Everything a job needs besides its own identity
pub struct JobContext {
    /// Relay shared by every job of the service
    pub relay: StreamRelay,
    /// Trimming collaborator
    pub transcoder: Arc<dyn Transcoder>,
    /// Batch event bus
    pub publisher: EventPublisher,
    /// Batch working directory
    pub working_dir: PathBuf,
    /// Format selector passed to the resolver
    pub format_selector: Option<String>,
    /// Optional time range applied after download
    pub trim: Option<TrimRange>,
    /// Minimum spacing of progress events
    pub progress_interval: Duration,
    /// Write buffer size
    pub chunk_size: usize,
    /// Batch cancellation
    pub cancel: CancellationToken,
}

/// Runs one job to a terminal state, reporting on the event bus
///
/// A job failure is reported as an `error` event and returned in the job
/// record; it never propagates to the caller.
#[derive(Clone)]
pub struct JobRunner {
    ctx: Arc<JobContext>,
}

impl JobRunner {
    /// Create a runner over a shared context
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    /// Execute `job`, returning it as `Succeeded` or `Failed`
    ///
    /// Emits exactly one terminal event: `video_finished` or `error`.
    pub async fn run(&self, mut job: DownloadJob) -> DownloadJob {
        let publisher = &self.ctx.publisher;
        job.status = JobStatus::Running;
        publisher.status(
            format!("Starting download for video #{}", job.number()),
            Some(job.index),
        );

        match self.execute(&job).await {
            Ok((path, filename)) => {
                tracing::info!(
                    video_index = job.index,
                    file = %path.display(),
                    "Job finished"
                );
                job.status = JobStatus::Succeeded;
                job.output_path = Some(path);
                publisher.publish(Event::VideoFinished {
                    video_index: job.index,
                    filename,
                    message: "Finished downloading this video.".into(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    video_index = job.index,
                    source = %job.source_ref,
                    error = %e,
                    "Job failed"
                );
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                publisher.error(
                    format!("Video #{} failed: {e}", job.number()),
                    Some(job.index),
                );
            }
        }
        job
    }

    /// Fail `job` without running it (batch cancelled while it was queued)
    pub fn skip(&self, mut job: DownloadJob, reason: &Error) -> DownloadJob {
        job.status = JobStatus::Failed;
        job.error = Some(reason.to_string());
        self.ctx.publisher.error(
            format!("Video #{} failed: {reason}", job.number()),
            Some(job.index),
        );
        job
    }

    async fn execute(&self, job: &DownloadJob) -> Result<(PathBuf, String)> {
        let ctx = &self.ctx;
        let logger: Arc<dyn JobLogger> = Arc::new(EventLogger::new(ctx.publisher.clone(), job.index));

        let mut stream = ctx.relay.relay(
            job.source_ref.clone(),
            ctx.format_selector.clone(),
            logger.clone(),
            ctx.cancel.clone(),
        );
        let info = stream.ready().await?;

        let filename = output_filename(job.number(), info.title.as_deref(), &info.container);
        let output = ctx.working_dir.join(&filename);

        let mut throttle = ProgressThrottle::new(ctx.progress_interval);
        let mut meter = TransferMeter::start(info.total_bytes);
        let publisher = ctx.publisher.clone();
        let video_index = job.index;
        let progress_name = filename.clone();

        write_stream_to_file(&mut stream, &output, ctx.chunk_size, |written, total| {
            meter.add(written);
            meter.set_total(total);
            if throttle.should_emit() {
                publisher.publish(progress_event(video_index, &progress_name, &meter));
            }
        })
        .await?;

        // Final figures, regardless of throttling
        if meter.snapshot().total_bytes.is_none() {
            meter.set_total(Some(meter.downloaded()));
        }
        ctx.publisher
            .publish(progress_event(job.index, &filename, &meter));

        match &ctx.trim {
            None => Ok((output, filename)),
            Some(range) => {
                let trimmed_name = format!("trimmed_{filename}");
                let trimmed = ctx.working_dir.join(&trimmed_name);
                let result = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
                    trimmed_result = ctx.transcoder.trim(&output, &trimmed, range, logger.as_ref()) => trimmed_result,
                };
                remove_quietly(&output).await;
                match result {
                    Ok(()) => Ok((trimmed, trimmed_name)),
                    Err(e) => {
                        remove_quietly(&trimmed).await;
                        Err(e)
                    }
                }
            }
        }
    }
}

/// `<n> - <sanitized title>.<container>`
pub(crate) fn output_filename(number: usize, title: Option<&str>, container: &str) -> String {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(FALLBACK_TITLE);
    format!("{number} - {}.{container}", sanitize_filename(title))
}

fn progress_event(video_index: usize, filename: &str, meter: &TransferMeter) -> Event {
    let snapshot = meter.snapshot();
    Event::Progress {
        video_index,
        filename: filename.to_string(),
        percent: snapshot.percent,
        downloaded_bytes: snapshot.downloaded_bytes,
        total_bytes: snapshot.total_bytes,
        speed_bps: snapshot.speed_bps,
        eta_secs: snapshot.eta_secs,
    }
}

/// Drain `stream` into `path` through a `.part` file
///
/// `on_chunk` receives the size of each written chunk and the object size
/// known so far. The partial file is renamed into place on success and
/// removed on any failure. Returns the number of bytes written.
pub(crate) async fn write_stream_to_file<F>(
    stream: &mut RelayStream,
    path: &Path,
    buffer_size: usize,
    mut on_chunk: F,
) -> Result<u64>
where
    F: FnMut(u64, Option<u64>),
{
    let partial = partial_path(path);
    let result = async {
        let file = tokio::fs::File::create(&partial).await?;
        let mut writer = BufWriter::with_capacity(buffer_size, file);
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64, stream.total_bytes());
        }
        writer.flush().await?;
        Ok::<u64, Error>(written)
    }
    .await;

    match result {
        Ok(written) => {
            if let Err(e) = tokio::fs::rename(&partial, path).await {
                remove_quietly(&partial).await;
                return Err(e.into());
            }
            Ok(written)
        }
        Err(e) => {
            remove_quietly(&partial).await;
            Err(e)
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}
