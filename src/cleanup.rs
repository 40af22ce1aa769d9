//! Periodic removal of abandoned working directories
//!
//! Batch and trim sessions work inside `tmp*` directories below the output
//! root. They are normally removed when the session ends; anything left behind
//! (crash, failed removal) is swept by [`spawn_cleanup_task`] once it is older
//! than [`CleanupConfig::max_age`] and no live session owns it.

use crate::batch::{SESSION_DIR_PREFIX, SessionRegistry};
use crate::config::CleanupConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn the cleanup loop
///
/// Sweeps `root` every `config.interval` until `token` is cancelled. The first
/// sweep runs immediately.
pub fn spawn_cleanup_task(
    config: CleanupConfig,
    root: PathBuf,
    registry: SessionRegistry,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            root = %root.display(),
            interval_secs = config.interval.as_secs(),
            max_age_secs = config.max_age.as_secs(),
            "Cleanup task started"
        );
        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match sweep_stale_sessions(&root, config.max_age, &registry).await {
                        Ok(0) => debug!("No stale working directories"),
                        Ok(removed) => info!(removed, "Removed stale working directories"),
                        Err(e) => warn!(error = %e, "Cleanup sweep failed"),
                    }
                }
                _ = token.cancelled() => {
                    debug!("Cleanup task stopped");
                    break;
                }
            }
        }
    })
}

/// Remove inactive `tmp*` directories below `root` at least `max_age` old
///
/// Returns the number of directories removed. Individual removal failures are
/// logged and skipped.
pub async fn sweep_stale_sessions(
    root: &Path,
    max_age: Duration,
    registry: &SessionRegistry,
) -> std::io::Result<usize> {
    if tokio::fs::metadata(root).await.is_err() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let is_session = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(SESSION_DIR_PREFIX));
            if !is_session {
                pending.push(path);
                continue;
            }
            if registry.is_active(&path) {
                debug!(path = %path.display(), "Skipping active working directory");
                continue;
            }

            let age = entry
                .metadata()
                .await?
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "Removed stale working directory");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove working directory"),
            }
        }
    }

    Ok(removed)
}
