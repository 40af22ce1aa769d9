//! Batch sessions and the registry of working directories in use

use crate::error::{Error, Result};
use crate::types::DownloadJob;
use crate::utils::sanitize_filename;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

/// Name prefix of batch working directories
pub const SESSION_DIR_PREFIX: &str = "tmp";

/// Archive base name when the request carries no title
const DEFAULT_ARCHIVE_STEM: &str = "playlist";

/// Working directories currently owned by a running batch or relay
///
/// The cleanup task never removes a registered directory, however old.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` active until the returned guard is dropped
    pub fn register(&self, path: &Path) -> SessionGuard {
        let key = registry_key(path);
        self.lock().insert(key.clone());
        SessionGuard {
            registry: self.clone(),
            key,
        }
    }

    /// Whether `path` belongs to a live session
    pub fn is_active(&self, path: &Path) -> bool {
        self.lock().contains(&registry_key(path))
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // The set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn registry_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Keeps a working directory registered while alive
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    key: PathBuf,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// Bounded-lifetime context of one batch request
///
/// Owns the `tmp*` working directory shared by the batch's jobs. The directory
/// is removed when the session is dropped or [finished](Self::finish).
#[derive(Debug)]
pub struct BatchSession {
    id: String,
    output_dir: PathBuf,
    archive_name: String,
    jobs: Vec<DownloadJob>,
    // Declared before the directory so it is unregistered first
    _guard: SessionGuard,
    working_dir: TempDir,
}

impl BatchSession {
    /// Create the working directory below `output_dir` and register it
    ///
    /// `output_dir` is created when missing.
    pub fn create(
        output_dir: &Path,
        playlist_title: Option<&str>,
        jobs: Vec<DownloadJob>,
        registry: &SessionRegistry,
    ) -> Result<Self> {
        std::fs::create_dir_all(output_dir).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create {}: {e}", output_dir.display()),
            ))
        })?;

        let working_dir = tempfile::Builder::new()
            .prefix(SESSION_DIR_PREFIX)
            .tempdir_in(output_dir)
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to create working directory: {e}"),
                ))
            })?;

        let id = working_dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let guard = registry.register(working_dir.path());

        let stem = playlist_title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_ARCHIVE_STEM);
        let archive_name = format!("{}.zip", sanitize_filename(stem));

        Ok(Self {
            id,
            output_dir: output_dir.to_path_buf(),
            archive_name,
            jobs,
            _guard: guard,
            working_dir,
        })
    }

    /// Session identifier (the working directory name)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Directory shared by the batch's jobs
    pub fn working_dir(&self) -> &Path {
        self.working_dir.path()
    }

    /// Directory receiving the archive
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Preferred archive file name (`<sanitized title>.zip`)
    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    /// Preferred archive path, before collision avoidance
    pub fn archive_path(&self) -> PathBuf {
        self.output_dir.join(&self.archive_name)
    }

    /// Jobs of this batch, in request order
    pub fn jobs(&self) -> &[DownloadJob] {
        &self.jobs
    }

    /// Record a job's terminal state
    pub fn record(&mut self, job: DownloadJob) {
        if let Some(slot) = self.jobs.get_mut(job.index) {
            *slot = job;
        }
    }

    /// Remove the working directory, reporting failures
    pub fn finish(self) -> Result<()> {
        let path = self.working_dir.path().to_path_buf();
        self.working_dir.close().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to remove {}: {e}", path.display()),
            ))
        })
    }
}
