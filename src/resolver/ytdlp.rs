//! Resolver backed by the external yt-dlp binary

use super::Resolver;
use crate::events::JobLogger;
use crate::types::PlayableDescriptor;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Protocols that point at manifests rather than a single byte stream
const MANIFEST_PROTOCOLS: &[&str] = &["m3u8", "m3u8_native", "http_dash_segments", "f4m", "ism"];

/// Resolver that runs `yt-dlp --dump-single-json` and picks a directly fetchable format
///
/// Only formats served as one HTTP byte stream qualify; merge selectors such as
/// `bestvideo+bestaudio` are skipped in favour of the next `/` alternative.
///
/// # Examples
///
/// ```no_run
/// use media_relay::resolver::YtDlpResolver;
/// use std::path::PathBuf;
///
/// // Explicit binary path with a cookie jar
/// let resolver = YtDlpResolver::new(PathBuf::from("/usr/local/bin/yt-dlp"))
///     .with_cookies(Some(PathBuf::from("cookies.txt")));
///
/// // Or auto-discover from PATH
/// let resolver = YtDlpResolver::from_path(None).expect("yt-dlp not found in PATH");
/// ```
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary_path: PathBuf,
    cookies_file: Option<PathBuf>,
}

impl YtDlpResolver {
    /// Create a resolver with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            cookies_file: None,
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path(cookies_file: Option<PathBuf>) -> Option<Self> {
        which::which("yt-dlp")
            .ok()
            .map(|path| Self::new(path).with_cookies(cookies_file))
    }

    /// Pass a Netscape cookie jar to every invocation
    pub fn with_cookies(mut self, cookies_file: Option<PathBuf>) -> Self {
        self.cookies_file = cookies_file;
        self
    }

    fn command(&self, source_ref: &str) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--dump-single-json")
            .arg("--no-playlist")
            .arg("--no-progress");
        if let Some(cookies) = &self.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg("--")
            .arg(source_ref)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(
        &self,
        source_ref: &str,
        format_selector: Option<&str>,
        logger: &dyn JobLogger,
    ) -> Result<PlayableDescriptor> {
        logger.info(&format!("Extracting metadata for {source_ref}"));

        let output = self
            .command(source_ref)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(warning) = line.strip_prefix("WARNING:") {
                logger.warn(warning.trim());
            }
        }

        if !output.status.success() {
            let reason = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            logger.error(&reason);
            return Err(Error::Resolver {
                source_ref: source_ref.to_string(),
                reason,
            });
        }

        let descriptor = descriptor_from_json(source_ref, &output.stdout, format_selector, logger)?;
        tracing::debug!(
            source = source_ref,
            format_id = ?descriptor.selected_format_id,
            container = %descriptor.container,
            "Resolved playable descriptor"
        );
        Ok(descriptor)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Resolver used when yt-dlp is unavailable
///
/// Every call fails with [`Error::NotSupported`], so the service still starts
/// and serves existing artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableResolver;

#[async_trait]
impl Resolver for UnavailableResolver {
    async fn resolve(
        &self,
        _source_ref: &str,
        _format_selector: Option<&str>,
        _logger: &dyn JobLogger,
    ) -> Result<PlayableDescriptor> {
        Err(Error::NotSupported(
            "Resolving sources requires the external yt-dlp binary. \
             Configure ytdlp_path in config or ensure yt-dlp is in PATH."
                .into(),
        ))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    #[serde(default)]
    format_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
}

impl FormatInfo {
    fn is_fetchable(&self) -> bool {
        let has_url = self.url.as_deref().is_some_and(|u| !u.is_empty());
        let is_manifest = self
            .protocol
            .as_deref()
            .is_some_and(|p| MANIFEST_PROTOCOLS.contains(&p));
        has_url && self.ext.is_some() && !is_manifest
    }

    fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }
}

/// Pick a format according to a yt-dlp style selector
///
/// Supports `/`-separated alternatives of `best`, `worst`, `bestvideo`,
/// `bestaudio` (and their short forms) or exact format ids. yt-dlp lists
/// formats worst to best, so "best" means the last match.
fn select_format<'a>(formats: &'a [FormatInfo], selector: Option<&str>) -> Option<&'a FormatInfo> {
    let fetchable: Vec<&FormatInfo> = formats.iter().filter(|f| f.is_fetchable()).collect();
    let selector = selector.unwrap_or("best");

    for alternative in selector.split('/').map(str::trim) {
        if alternative.contains('+') {
            continue;
        }
        let found = match alternative {
            "best" | "b" => fetchable
                .iter()
                .rev()
                .find(|f| f.has_video() && f.has_audio()),
            "worst" | "w" => fetchable.iter().find(|f| f.has_video() && f.has_audio()),
            "bestvideo" | "bv" => fetchable
                .iter()
                .rev()
                .find(|f| f.has_video() && !f.has_audio()),
            "bestaudio" | "ba" => fetchable
                .iter()
                .rev()
                .find(|f| f.has_audio() && !f.has_video()),
            id => fetchable
                .iter()
                .find(|f| f.format_id.as_deref() == Some(id)),
        };
        if let Some(format) = found {
            return Some(*format);
        }
    }

    None
}

fn descriptor_from_json(
    source_ref: &str,
    raw: &[u8],
    selector: Option<&str>,
    logger: &dyn JobLogger,
) -> Result<PlayableDescriptor> {
    let info: VideoInfo = serde_json::from_slice(raw).map_err(|e| Error::Resolver {
        source_ref: source_ref.to_string(),
        reason: format!("unreadable yt-dlp output: {e}"),
    })?;

    if info.formats.is_empty() {
        return Err(Error::Resolver {
            source_ref: source_ref.to_string(),
            reason: "no formats found".into(),
        });
    }

    let format = match select_format(&info.formats, selector) {
        Some(format) => format,
        None => {
            // Same fallback as an unmatched format id: the best fetchable entry
            let fallback = info
                .formats
                .iter()
                .rev()
                .find(|f| f.is_fetchable())
                .ok_or_else(|| Error::Resolver {
                    source_ref: source_ref.to_string(),
                    reason: "unable to select a playable format".into(),
                })?;
            logger.warn(&format!(
                "Requested format '{}' not available, falling back to {}",
                selector.unwrap_or("best"),
                fallback.format_id.as_deref().unwrap_or("unknown")
            ));
            fallback
        }
    };

    let (Some(url), Some(ext)) = (format.url.clone(), format.ext.clone()) else {
        return Err(Error::Resolver {
            source_ref: source_ref.to_string(),
            reason: "selected format has no URL".into(),
        });
    };

    logger.info(&format!(
        "Selected format {} ({ext})",
        format.format_id.as_deref().unwrap_or("unknown")
    ));

    Ok(PlayableDescriptor {
        direct_url: url,
        container: ext,
        http_headers: format.http_headers.clone(),
        selected_format_id: format.format_id.clone(),
        title: info.title,
    })
}
