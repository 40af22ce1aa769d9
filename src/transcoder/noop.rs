//! No-op transcoder for graceful degradation

use super::Transcoder;
use crate::events::JobLogger;
use crate::types::TrimRange;
use async_trait::async_trait;
use std::path::Path;

/// Transcoder used when ffmpeg is unavailable
///
/// Untrimmed downloads keep working; requests with a time range fail with
/// `Error::NotSupported`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTranscoder;

#[async_trait]
impl Transcoder for NoOpTranscoder {
    async fn trim(
        &self,
        _input: &Path,
        _output: &Path,
        _range: &TrimRange,
        _logger: &dyn JobLogger,
    ) -> crate::Result<()> {
        Err(crate::Error::NotSupported(
            "Trimming requires the external ffmpeg binary. \
             Configure ffmpeg_path in config or ensure ffmpeg is in PATH."
                .into(),
        ))
    }

    fn can_trim(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
