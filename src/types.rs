//! Core types for media-relay

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use utoipa::ToSchema;

/// Resolved, time-limited pointer to fetchable media bytes
///
/// Produced fresh by every resolver call and never reused across relay attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayableDescriptor {
    /// Direct URL of the media bytes (short-lived)
    pub direct_url: String,
    /// Container / file extension (e.g. "mp4", "webm", "m4a")
    pub container: String,
    /// Headers the origin expects, merged over the relay defaults
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    /// Format identifier chosen by the resolver
    #[serde(default)]
    pub selected_format_id: Option<String>,
    /// Human-readable title used for output naming
    #[serde(default)]
    pub title: Option<String>,
}

impl PlayableDescriptor {
    /// Create a descriptor with no extra headers or metadata
    pub fn new(direct_url: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            direct_url: direct_url.into(),
            container: container.into(),
            http_headers: BTreeMap::new(),
            selected_format_id: None,
            title: None,
        }
    }
}

/// Download job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, waiting for a pool slot
    Pending,
    /// Holding a pool slot
    Running,
    /// Output written
    Succeeded,
    /// Failed in isolation
    Failed,
}

impl JobStatus {
    /// Returns true once the job can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One item of a batch
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadJob {
    /// 0-based position in the request, stable for the job's lifetime
    pub index: usize,
    /// Source identifier handed to the resolver
    pub source_ref: String,
    /// Current status
    pub status: JobStatus,
    /// Output file, set on success
    #[schema(value_type = Option<String>)]
    pub output_path: Option<PathBuf>,
    /// Failure description, set on failure
    pub error: Option<String>,
}

impl DownloadJob {
    /// New pending job
    pub fn new(index: usize, source_ref: impl Into<String>) -> Self {
        Self {
            index,
            source_ref: source_ref.into(),
            status: JobStatus::Pending,
            output_path: None,
            error: None,
        }
    }

    /// 1-based number used in messages and file names
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Severity of a `log` event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational collaborator output
    Info,
    /// Recoverable problem
    Warning,
    /// Error reported by a collaborator
    Error,
}

/// Event emitted during a batch download
///
/// Serialized with an `event` discriminator, e.g.
/// `{"event":"progress","video_index":0,"percent":42.0,...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Human-readable batch or job status line
    Status {
        /// Status text
        message: String,
        /// Job the status refers to (absent for batch-level status)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_index: Option<usize>,
    },

    /// Transfer progress of one job
    Progress {
        /// Job index (0-based)
        video_index: usize,
        /// Output file name
        filename: String,
        /// Progress percentage (0.0 to 100.0), 0.0 while the size is unknown
        percent: f64,
        /// Bytes written so far
        downloaded_bytes: u64,
        /// Expected size, when the origin reports it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        /// Average speed since the transfer started
        speed_bps: u64,
        /// Estimated seconds remaining
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_secs: Option<u64>,
    },

    /// Job finished successfully
    VideoFinished {
        /// Job index (0-based)
        video_index: usize,
        /// Output file name
        filename: String,
        /// Completion text
        message: String,
    },

    /// Collaborator log line
    Log {
        /// Severity
        level: LogLevel,
        /// Text, prefixed with the job tag (`[video_n]`)
        message: String,
        /// Job the line belongs to
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_index: Option<usize>,
    },

    /// Failure of one job, or of the batch when `video_index` is absent
    Error {
        /// Error text
        message: String,
        /// Failed job (absent for batch-level failures)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_index: Option<usize>,
    },

    /// Batch packaged; the archive can be retrieved at `zip_url`
    Completed {
        /// Completion text
        message: String,
        /// Retrieval handle (`/download/<relative path>`)
        zip_url: String,
        /// Archive file name
        archive_name: String,
    },
}

impl Event {
    /// Job index this event belongs to, if any
    pub fn video_index(&self) -> Option<usize> {
        match self {
            Event::Status { video_index, .. }
            | Event::Log { video_index, .. }
            | Event::Error { video_index, .. } => *video_index,
            Event::Progress { video_index, .. } | Event::VideoFinished { video_index, .. } => {
                Some(*video_index)
            }
            Event::Completed { .. } => None,
        }
    }

    /// Returns true for the per-job terminal events (`video_finished` or a job `error`)
    pub fn is_job_terminal(&self) -> bool {
        match self {
            Event::VideoFinished { .. } => true,
            Event::Error { video_index, .. } => video_index.is_some(),
            _ => false,
        }
    }

    /// Returns true for the batch-level terminal events (`completed` or a batch `error`)
    pub fn is_batch_terminal(&self) -> bool {
        match self {
            Event::Completed { .. } => true,
            Event::Error { video_index, .. } => video_index.is_none(),
            _ => false,
        }
    }
}

/// Selection mode for single and batch downloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Video with audio
    #[default]
    Video,
    /// Audio only
    Audio,
}

/// Time range passed to the transcoder
///
/// Times are ffmpeg position strings (`HH:MM:SS[.ms]` or seconds).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrimRange {
    /// Start position (None = from the beginning)
    pub start: Option<String>,
    /// End position (None = to the end)
    pub end: Option<String>,
}

impl TrimRange {
    /// Build a range from request fields, returning None when nothing would be cut
    ///
    /// A start of `00:00:00` (or empty) without an end is a full-length selection.
    pub fn from_request(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        let start = start
            .map(str::trim)
            .filter(|s| !s.is_empty() && !is_zero_position(s))
            .map(str::to_string);
        let end = end
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if start.is_none() && end.is_none() {
            None
        } else {
            Some(Self { start, end })
        }
    }
}

fn is_zero_position(s: &str) -> bool {
    s.chars().all(|c| c == '0' || c == ':' || c == '.')
}

/// Single item request (`POST /download`)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RelayRequest {
    /// Source URL or bare item id
    pub url: String,
    /// Video or audio selection
    #[serde(default)]
    pub mode: DownloadMode,
    /// Explicit format selector
    #[serde(default)]
    pub format_id: Option<String>,
    /// Video format id (takes precedence over `format_id` in video mode)
    #[serde(default)]
    pub video_id: Option<String>,
    /// Audio format id (takes precedence over `format_id` in audio mode)
    #[serde(default)]
    pub audio_id: Option<String>,
    /// Trim start (e.g. "00:01:30")
    #[serde(default)]
    pub start_time: Option<String>,
    /// Trim end (e.g. "00:02:00")
    #[serde(default)]
    pub end_time: Option<String>,
    /// Output sub-directory for the trim path
    #[serde(default)]
    pub download_path: Option<String>,
}

impl RelayRequest {
    /// Format selector for the resolver, following the mode's precedence
    pub fn format_selector(&self) -> Option<String> {
        let specific = match self.mode {
            DownloadMode::Video => self.video_id.as_ref(),
            DownloadMode::Audio => self.audio_id.as_ref(),
        };
        specific
            .or(self.format_id.as_ref())
            .cloned()
            .or_else(|| (self.mode == DownloadMode::Audio).then(|| "bestaudio/best".to_string()))
    }

    /// Requested trim, if any
    pub fn trim(&self) -> Option<TrimRange> {
        TrimRange::from_request(self.start_time.as_deref(), self.end_time.as_deref())
    }
}

/// Batch request (`POST /downloadplaylist`)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchRequest {
    /// Collection URL the items came from (informational)
    #[serde(default)]
    pub url: Option<String>,
    /// Item identifiers or URLs, in output order
    pub video_ids: Vec<String>,
    /// Output sub-directory below the download root
    #[serde(default)]
    pub download_path: Option<String>,
    /// Archive base name (default: "playlist")
    #[serde(default)]
    pub playlist_title: Option<String>,
    /// Video or audio selection applied to every item
    #[serde(default)]
    pub mode: DownloadMode,
    /// Trim start applied to every item
    #[serde(default)]
    pub start_time: Option<String>,
    /// Trim end applied to every item
    #[serde(default)]
    pub end_time: Option<String>,
}

impl BatchRequest {
    /// Batch over the given item ids with every option at its default
    pub fn new<I, S>(video_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            url: None,
            video_ids: video_ids.into_iter().map(Into::into).collect(),
            download_path: None,
            playlist_title: None,
            mode: DownloadMode::default(),
            start_time: None,
            end_time: None,
        }
    }

    /// Requested trim, if any
    pub fn trim(&self) -> Option<TrimRange> {
        TrimRange::from_request(self.start_time.as_deref(), self.end_time.as_deref())
    }
}

/// Collaborators selected at startup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Capabilities {
    /// Resolver implementation (e.g. "yt-dlp", "unavailable")
    pub resolver: String,
    /// Transcoder implementation (e.g. "ffmpeg", "noop")
    pub transcoder: String,
    /// Archive packager implementation
    pub packager: String,
    /// Whether trimmed downloads can be served
    pub can_trim: bool,
}
