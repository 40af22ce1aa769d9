//! Trimming through the external ffmpeg binary

use super::Transcoder;
use crate::error::{Error, Result};
use crate::events::JobLogger;
use crate::types::TrimRange;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Trims with `ffmpeg -c copy` (no re-encoding)
pub struct FfmpegTranscoder {
    binary_path: PathBuf,
}

impl FfmpegTranscoder {
    /// Create a transcoder with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    fn command(&self, input: &Path, output: &Path, range: &TrimRange) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-y").arg("-hide_banner").arg("-loglevel").arg("warning");
        if let Some(start) = &range.start {
            cmd.arg("-ss").arg(start);
        }
        if let Some(end) = &range.end {
            cmd.arg("-to").arg(end);
        }
        cmd.arg("-i")
            .arg(input)
            .arg("-c")
            .arg("copy")
            .arg("-avoid_negative_ts")
            .arg("1")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn trim(
        &self,
        input: &Path,
        output: &Path,
        range: &TrimRange,
        logger: &dyn JobLogger,
    ) -> Result<()> {
        logger.info(&format!(
            "Trimming from {} to {}",
            range.start.as_deref().unwrap_or("start"),
            range.end.as_deref().unwrap_or("end")
        ));

        let result = self
            .command(input, output, range)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute ffmpeg: {}", e)))?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        if !result.status.success() {
            let reason = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("ffmpeg exited with {}", result.status));
            logger.error(&reason);
            return Err(Error::ExternalTool(format!("ffmpeg trim failed: {reason}")));
        }

        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            logger.warn(line);
        }
        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            "Trim completed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
