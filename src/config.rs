//! Configuration types for media-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

/// Main configuration for [`MediaRelay`](crate::MediaRelay)
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - output root, batch concurrency, progress cadence
/// - [`relay`](RelayConfig) - retry policy and origin HTTP settings
/// - [`tools`](ToolsConfig) - external binary paths (yt-dlp, ffmpeg)
/// - [`cleanup`](CleanupConfig) - stale session removal
/// - [`server`](ApiConfig) - REST API binding and CORS
///
/// Every field has a default, so `{}` is a valid configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Stream relay settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Stale working directory cleanup
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// REST API settings
    #[serde(default)]
    pub server: ApiConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {e}", path.display()),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {e}", path.display()),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_jobs == 0 {
            return Err(Error::Config {
                message: "max_concurrent_jobs must be at least 1".into(),
                key: Some("download.max_concurrent_jobs".into()),
            });
        }
        if self.relay.max_attempts == 0 {
            return Err(Error::Config {
                message: "max_attempts must be at least 1".into(),
                key: Some("relay.max_attempts".into()),
            });
        }
        if self.relay.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be greater than zero".into(),
                key: Some("relay.chunk_size".into()),
            });
        }
        if !self.download.item_url_template.contains("{id}") {
            return Err(Error::Config {
                message: "item_url_template must contain the {id} placeholder".into(),
                key: Some("download.item_url_template".into()),
            });
        }
        Ok(())
    }

    /// Output root for relayed files and batch archives
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }
}

/// Download behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output root (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum jobs running at once within one batch (default: 5)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Template used to expand bare item identifiers into source URLs
    #[serde(default = "default_item_url_template")]
    pub item_url_template: String,

    /// Minimum spacing between progress events per job (default: 500ms)
    #[serde(default = "default_progress_interval", with = "duration_millis_serde")]
    pub progress_interval: Duration,

    /// Format selector used by batch jobs (default: "bestvideo+bestaudio/best")
    #[serde(default = "default_batch_format")]
    pub batch_format: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            item_url_template: default_item_url_template(),
            progress_interval: default_progress_interval(),
            batch_format: default_batch_format(),
        }
    }
}

/// Delay growth between relay attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackoffPolicy {
    /// `backoff_base × attempt`
    #[default]
    Linear,
    /// `backoff_base × multiplier^(attempt-1)`, capped at `max_delay`
    Exponential {
        /// Growth factor per attempt
        multiplier: f64,
        /// Upper bound on a single delay
        #[serde(with = "duration_millis_serde")]
        max_delay: Duration,
    },
}

/// Stream relay configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum number of attempts including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts (default: 500ms)
    #[serde(default = "default_backoff_base", with = "duration_millis_serde")]
    pub backoff_base: Duration,

    /// Delay growth policy (default: linear)
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Write buffer and stream framing size in bytes (default: 1 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// User-Agent sent to origins unless the descriptor overrides it
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 20s)
    #[serde(default = "default_connect_timeout", with = "duration_millis_serde")]
    pub connect_timeout: Duration,

    /// Maximum idle time waiting for response headers or a body chunk (default: 20s)
    #[serde(default = "default_read_timeout", with = "duration_millis_serde")]
    pub read_timeout: Duration,

    /// Treat HTTP 429 as transient (default: true)
    #[serde(default = "default_true")]
    pub retry_on_rate_limit: bool,

    /// Cookie jar passed through to the resolver
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff: BackoffPolicy::default(),
            jitter: false,
            chunk_size: default_chunk_size(),
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            retry_on_rate_limit: true,
            cookies_file: None,
        }
    }
}

/// External tool paths (yt-dlp, ffmpeg)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            search_path: true,
        }
    }
}

/// Removal of abandoned batch working directories
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Run the periodic cleanup task (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often to scan the output root (default: 10 minutes)
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Minimum age before an inactive working directory is removed (default: 2 minutes)
    #[serde(default = "default_cleanup_max_age", with = "duration_serde")]
    pub max_age: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_cleanup_interval(),
            max_age: default_cleanup_max_age(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:5000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_item_url_template() -> String {
    "https://www.youtube.com/watch?v={id}".into()
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_batch_format() -> String {
    "bestvideo+bestaudio/best".into()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> Duration {
    Duration::from_millis(500)
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        .into()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_cleanup_max_age() -> Duration {
    Duration::from_secs(120)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper (seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Sub-second settings (backoff, timeouts, throttling) are written in milliseconds
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
