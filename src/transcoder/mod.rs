//! Media trimming
//!
//! The [`Transcoder`] trait cuts a time range out of a downloaded file without
//! re-encoding. Two implementations are provided:
//!
//! - [`FfmpegTranscoder`]: runs the external `ffmpeg` binary with stream copy
//! - [`NoOpTranscoder`]: used when ffmpeg is unavailable; every trim fails with
//!   [`Error::NotSupported`](crate::Error::NotSupported)

mod ffmpeg;
mod noop;

pub use ffmpeg::FfmpegTranscoder;
pub use noop::NoOpTranscoder;

use crate::events::JobLogger;
use crate::types::TrimRange;
use async_trait::async_trait;
use std::path::Path;

/// Cuts a time range out of a media file
///
/// # Examples
///
/// ```no_run
/// use media_relay::events::TracingLogger;
/// use media_relay::transcoder::{FfmpegTranscoder, Transcoder};
/// use media_relay::types::TrimRange;
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transcoder = FfmpegTranscoder::from_path().expect("ffmpeg not found in PATH");
/// let range = TrimRange::from_request(Some("00:00:10"), Some("00:00:20")).unwrap();
///
/// transcoder
///     .trim(
///         Path::new("clip.mp4"),
///         Path::new("trimmed_clip.mp4"),
///         &range,
///         &TracingLogger::new("clip"),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write the `range` of `input` to `output`, overwriting it
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be started, exits unsuccessfully,
    /// or trimming is not supported by this implementation.
    async fn trim(
        &self,
        input: &Path,
        output: &Path,
        range: &TrimRange,
        logger: &dyn JobLogger,
    ) -> crate::Result<()>;

    /// Whether [`trim`](Self::trim) can succeed at all
    fn can_trim(&self) -> bool {
        true
    }

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
