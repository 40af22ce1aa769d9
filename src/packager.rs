//! Archive packaging of completed batch outputs

use crate::error::{Error, Result};
use crate::utils::PARTIAL_SUFFIX;
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Archive produced by an [`ArchivePackager`]
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    /// Final archive path
    pub path: PathBuf,
    /// Entry names, in archive order
    pub entries: Vec<String>,
}

/// Bundles the files of a working directory into one archive
///
/// Invoked once per batch, after every job has terminated. An empty
/// directory yields a valid, empty archive.
#[async_trait]
pub trait ArchivePackager: Send + Sync {
    /// Package the regular files directly inside `source_dir` into `archive_path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Packaging`] if the directory cannot be read or the
    /// archive cannot be written. No partial archive is left at `archive_path`.
    async fn package(&self, source_dir: &Path, archive_path: &Path) -> Result<PackagedArchive>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// ZIP packager with stored (uncompressed) entries
///
/// Media containers are already compressed, so entries are stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipPackager;

#[async_trait]
impl ArchivePackager for ZipPackager {
    async fn package(&self, source_dir: &Path, archive_path: &Path) -> Result<PackagedArchive> {
        let source_dir = source_dir.to_path_buf();
        let archive_path = archive_path.to_path_buf();
        let failure_path = archive_path.clone();

        tokio::task::spawn_blocking(move || write_zip(&source_dir, &archive_path))
            .await
            .map_err(|e| Error::Packaging {
                archive: failure_path,
                reason: format!("packaging task failed: {e}"),
            })?
    }

    fn name(&self) -> &'static str {
        "zip"
    }
}

/// Regular files directly inside `dir`, sorted by name
///
/// Skips hidden files, unfinished `.part` files and `exclude` itself.
fn collect_entries(dir: &Path, exclude: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || path == exclude {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            tracing::warn!(path = %path.display(), "Skipping entry with non UTF-8 name");
            continue;
        };
        if name.starts_with('.') || name.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        entries.push((name, path));
    }
    entries.sort();
    Ok(entries)
}

fn write_zip(source_dir: &Path, archive_path: &Path) -> Result<PackagedArchive> {
    let fail = |reason: String| Error::Packaging {
        archive: archive_path.to_path_buf(),
        reason,
    };

    let entries = collect_entries(source_dir, archive_path)
        .map_err(|e| fail(format!("failed to read {}: {e}", source_dir.display())))?;

    let mut partial = archive_path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let written = (|| -> std::result::Result<(), String> {
        let file = File::create(&partial).map_err(|e| format!("failed to create archive: {e}"))?;
        let mut writer = zip::ZipWriter::new(BufWriter::new(file));
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .large_file(true);

        for (name, path) in &entries {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| format!("failed to add {name}: {e}"))?;
            let mut input = BufReader::new(
                File::open(path).map_err(|e| format!("failed to open {name}: {e}"))?,
            );
            std::io::copy(&mut input, &mut writer)
                .map_err(|e| format!("failed to write {name}: {e}"))?;
        }

        let mut inner = writer
            .finish()
            .map_err(|e| format!("failed to finalize archive: {e}"))?;
        std::io::Write::flush(&mut inner).map_err(|e| format!("failed to flush archive: {e}"))?;
        Ok(())
    })();

    if let Err(reason) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(fail(reason));
    }

    std::fs::rename(&partial, archive_path).map_err(|e| {
        let _ = std::fs::remove_file(&partial);
        fail(format!("failed to move archive into place: {e}"))
    })?;

    tracing::info!(
        archive = %archive_path.display(),
        entries = entries.len(),
        "Archive created"
    );

    Ok(PackagedArchive {
        path: archive_path.to_path_buf(),
        entries: entries.into_iter().map(|(name, _)| name).collect(),
    })
}
