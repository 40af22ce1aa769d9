//! Service facade
//!
//! [`MediaRelay`] owns the configuration, the shared origin client, the
//! collaborators and the shutdown token. The HTTP API and the binary only talk
//! to this type.
//!
//! Implementation is split across focused submodules:
//! - [`single`] - single-item relay and trimmed downloads
//! - [`lifecycle`] - shutdown coordination

mod lifecycle;
mod single;

pub use single::{SingleBody, SingleDownload};

use crate::batch::{BatchOrchestrator, BatchServices, SessionRegistry};
use crate::cleanup::spawn_cleanup_task;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EventStream;
use crate::packager::{ArchivePackager, ZipPackager};
use crate::relay::StreamRelay;
use crate::resolver::{Resolver, UnavailableResolver, YtDlpResolver};
use crate::transcoder::{FfmpegTranscoder, NoOpTranscoder, Transcoder};
use crate::types::{BatchRequest, Capabilities};
use crate::utils::confine_to_root;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// External collaborators used by the service
#[derive(Clone)]
pub struct Collaborators {
    /// Source resolver
    pub resolver: Arc<dyn Resolver>,
    /// Trimming collaborator
    pub transcoder: Arc<dyn Transcoder>,
    /// Batch archive packager
    pub packager: Arc<dyn ArchivePackager>,
}

impl Collaborators {
    /// Pick implementations from the tools configuration
    ///
    /// Explicit binary paths win; otherwise PATH is searched when
    /// `tools.search_path` is set. Missing tools degrade to implementations
    /// that report `NotSupported`.
    pub fn from_config(config: &Config) -> Self {
        let cookies = config.relay.cookies_file.clone();
        let resolver: Arc<dyn Resolver> = if let Some(ref path) = config.tools.ytdlp_path {
            Arc::new(YtDlpResolver::new(path.clone()).with_cookies(cookies))
        } else if config.tools.search_path {
            YtDlpResolver::from_path(cookies)
                .map(|r| Arc::new(r) as Arc<dyn Resolver>)
                .unwrap_or_else(|| Arc::new(UnavailableResolver))
        } else {
            Arc::new(UnavailableResolver)
        };

        let transcoder: Arc<dyn Transcoder> = if let Some(ref path) = config.tools.ffmpeg_path {
            Arc::new(FfmpegTranscoder::new(path.clone()))
        } else if config.tools.search_path {
            FfmpegTranscoder::from_path()
                .map(|t| Arc::new(t) as Arc<dyn Transcoder>)
                .unwrap_or_else(|| Arc::new(NoOpTranscoder))
        } else {
            Arc::new(NoOpTranscoder)
        };

        Self {
            resolver,
            transcoder,
            packager: Arc::new(ZipPackager),
        }
    }
}

/// Media relay service
///
/// # Example
///
/// ```no_run
/// use media_relay::{Config, MediaRelay};
/// use media_relay::types::BatchRequest;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = MediaRelay::new(Config::default()).await?;
///
///     let mut events = service.execute_batch(BatchRequest::new(["dQw4w9WgXcQ"]))?;
///     while let Some(event) = events.next_event().await {
///         println!("{}", serde_json::to_string(&event)?);
///     }
///
///     service.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct MediaRelay {
    config: Arc<Config>,
    relay: StreamRelay,
    batches: BatchOrchestrator,
    collaborators: Collaborators,
    sessions: SessionRegistry,
    shutdown: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MediaRelay {
    /// Create a service with collaborators discovered from the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the download directory
    /// cannot be created or the HTTP client cannot be built.
    pub async fn new(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config);
        Self::with_collaborators(config, collaborators).await
    }

    /// Create a service with explicit collaborators
    ///
    /// Starts the cleanup task when `cleanup.enabled` is set.
    pub async fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| Error::Config {
                message: format!(
                    "failed to create download directory {}: {e}",
                    config.download_dir().display()
                ),
                key: Some("download.download_dir".into()),
            })?;

        let client = StreamRelay::build_client(&config.relay)?;
        let relay = StreamRelay::new(client, collaborators.resolver.clone(), config.relay.clone());
        let sessions = SessionRegistry::new();
        let batches = BatchOrchestrator::new(
            &config,
            BatchServices {
                relay: relay.clone(),
                transcoder: collaborators.transcoder.clone(),
                packager: collaborators.packager.clone(),
                sessions: sessions.clone(),
            },
        );

        tracing::info!(
            resolver = collaborators.resolver.name(),
            transcoder = collaborators.transcoder.name(),
            packager = collaborators.packager.name(),
            download_dir = %config.download_dir().display(),
            "Media relay initialized"
        );

        let shutdown = CancellationToken::new();
        let cleanup_task = config.cleanup.enabled.then(|| {
            spawn_cleanup_task(
                config.cleanup.clone(),
                config.download_dir().clone(),
                sessions.clone(),
                shutdown.child_token(),
            )
        });

        Ok(Self {
            config: Arc::new(config),
            relay,
            batches,
            collaborators,
            sessions,
            shutdown,
            cleanup_task: Mutex::new(cleanup_task),
        })
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Collaborators selected at startup
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            resolver: self.collaborators.resolver.name().to_string(),
            transcoder: self.collaborators.transcoder.name().to_string(),
            packager: self.collaborators.packager.name().to_string(),
            can_trim: self.collaborators.transcoder.can_trim(),
        }
    }

    /// Working directories currently in use
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Token cancelled when the service shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start a batch and return its event stream
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after shutdown started, or
    /// [`Error::InvalidRequest`] when the request fails validation.
    pub fn execute_batch(&self, request: BatchRequest) -> Result<EventStream> {
        self.ensure_accepting()?;
        self.batches.execute(request, &self.shutdown)
    }

    /// Resolve a retrieval path to a produced artifact below the download root
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for missing files and any path outside the root.
    pub fn artifact(&self, relative: &str) -> Result<PathBuf> {
        confine_to_root(self.config.download_dir(), relative)
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let service = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(service, config).await })
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            Err(Error::ShuttingDown)
        } else {
            Ok(())
        }
    }
}
