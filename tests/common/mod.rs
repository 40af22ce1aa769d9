//! Common test utilities for media-relay integration tests

use async_trait::async_trait;
use media_relay::config::RelayConfig;
use media_relay::{
    Collaborators, Config, Error, JobLogger, MediaRelay, NoOpTranscoder, PlayableDescriptor,
    Resolver, Result, ZipPackager,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Resolver mapping every item to `<origin>/media/<item>?n=<call>`
///
/// Items in `unresolvable` fail resolution. Every call is counted.
pub struct OriginResolver {
    origin: String,
    unresolvable: HashSet<String>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl OriginResolver {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            unresolvable: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unresolvable(mut self, items: &[&str]) -> Self {
        self.unresolvable = items.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for OriginResolver {
    async fn resolve(
        &self,
        source_ref: &str,
        _format_selector: Option<&str>,
        _logger: &dyn JobLogger,
    ) -> Result<PlayableDescriptor> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let item = source_ref.rsplit('/').next().unwrap_or(source_ref);
        if self.unresolvable.contains(item) {
            return Err(Error::Resolver {
                source_ref: source_ref.to_string(),
                reason: "private video".into(),
            });
        }

        let mut descriptor =
            PlayableDescriptor::new(format!("{}/media/{item}?n={call}", self.origin), "webm");
        descriptor.title = Some(format!("Item {item}"));
        Ok(descriptor)
    }

    fn name(&self) -> &'static str {
        "origin"
    }
}

/// Logger that discards everything
pub struct NullLogger;

impl JobLogger for NullLogger {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Fast-retry configuration rooted at `root`
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.to_path_buf();
    config.download.item_url_template = "https://items.test/{id}".into();
    config.download.progress_interval = Duration::from_millis(10);
    config.cleanup.enabled = false;
    config.tools.search_path = false;
    config.relay = RelayConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
        ..RelayConfig::default()
    };
    config
}

/// Service over `resolver` with trimming disabled and zip packaging
#[allow(dead_code)]
pub async fn create_service(
    resolver: Arc<OriginResolver>,
    configure: impl FnOnce(&mut Config),
) -> (Arc<MediaRelay>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let collaborators = Collaborators {
        resolver,
        transcoder: Arc::new(NoOpTranscoder),
        packager: Arc::new(ZipPackager),
    };
    let service = MediaRelay::with_collaborators(config, collaborators)
        .await
        .unwrap();
    (Arc::new(service), temp_dir)
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}
