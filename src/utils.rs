//! Utility functions for file naming, path confinement and content types

use crate::batch::SESSION_DIR_PREFIX;
use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Suffix of files still being written
pub const PARTIAL_SUFFIX: &str = ".part";

/// Upper bound on a sanitized name, in bytes
const MAX_NAME_BYTES: usize = 180;

/// Name used when an output root alias means "the root itself"
const ROOT_ALIAS: &str = "Downloads";

#[allow(clippy::expect_used)] // Static pattern, safe to panic
static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    // Keep word characters, whitespace and a small set of punctuation
    Regex::new(r"[^\w\s\-_.,()'!&]+").expect("filename regex is valid")
});

/// Get a unique path for a file, appending ` (1)`, ` (2)`, ... on collision
///
/// # Examples
///
/// ```
/// use media_relay::utils::get_unique_path;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/does-not-exist-playlist.zip");
/// let unique = get_unique_path(path).unwrap();
/// // If the file exists, returns /tmp/does-not-exist-playlist (1).zip, etc.
/// assert_eq!(unique, path);
/// ```
pub fn get_unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem of {}", path.display())))?;

    let extension = path.extension().and_then(|e| e.to_str());

    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!(
            "cannot extract parent directory of {}",
            path.display()
        ))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(Error::Other(format!(
        "could not find unique filename for {} after {MAX_RENAME_ATTEMPTS} attempts",
        path.display()
    )))
}

/// Make a title safe to use as a file name
///
/// Removes characters outside `[\w\s\-_.,()'!&]`, collapses whitespace runs into
/// a single `_` and truncates to a bounded length. Returns `"untitled"` when
/// nothing survives.
///
/// ```
/// use media_relay::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Rock & Roll: Live / 1984"), "Rock_&_Roll_Live_1984");
/// assert_eq!(sanitize_filename("???"), "untitled");
/// ```
#[must_use]
pub fn sanitize_filename(title: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(title, "");
    let mut joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");

    // Leading dots would produce hidden files (or `.`/`..`)
    while joined.starts_with('.') {
        joined.remove(0);
    }

    if joined.len() > MAX_NAME_BYTES {
        let mut cut = MAX_NAME_BYTES;
        while !joined.is_char_boundary(cut) {
            cut -= 1;
        }
        joined.truncate(cut);
    }

    if joined.is_empty() {
        "untitled".to_string()
    } else {
        joined
    }
}

/// Resolve a client-supplied output sub-directory below `root`
///
/// - absent, empty or `"Downloads"` resolve to `root`
/// - relative paths resolve below `root`
/// - absolute paths and paths with `..` are rejected
/// - segments named like working directories (`tmp*`) are rejected, since the
///   cleanup sweep would treat them as abandoned sessions
pub fn resolve_output_dir(root: &Path, requested: Option<&str>) -> Result<PathBuf> {
    let requested = match requested.map(str::trim) {
        None | Some("") | Some(ROOT_ALIAS) => return Ok(root.to_path_buf()),
        Some(p) => p,
    };

    let relative = Path::new(requested);
    for component in relative.components() {
        match component {
            Component::Normal(name) if is_session_dir_name(name) => {
                return Err(Error::InvalidRequest(format!(
                    "download_path segments must not start with '{SESSION_DIR_PREFIX}': {requested}"
                )));
            }
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidRequest(format!(
                    "download_path must be a relative path inside the download directory: {requested}"
                )));
            }
        }
    }

    Ok(root.join(relative))
}

fn is_session_dir_name(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .is_some_and(|name| name.starts_with(SESSION_DIR_PREFIX))
}

/// Map a retrieval path onto a file below `root`, refusing anything outside it
///
/// The lexical check rejects `..` and absolute segments, files inside
/// working directories and unfinished `.part` files; the canonical check
/// rejects symlinks that lead outside the root. Anything that does not resolve
/// to an existing regular file is reported as [`Error::NotFound`].
pub fn confine_to_root(root: &Path, relative: &str) -> Result<PathBuf> {
    let not_found = || Error::NotFound(relative.to_string());

    let relative_path = Path::new(relative.trim_start_matches('/'));
    if relative_path.as_os_str().is_empty()
        || relative_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(not_found());
    }

    let in_working_dir = relative_path.parent().is_some_and(|parent| {
        parent
            .components()
            .any(|c| matches!(c, Component::Normal(name) if is_session_dir_name(name)))
    });
    if in_working_dir || relative.ends_with(PARTIAL_SUFFIX) {
        return Err(not_found());
    }

    let candidate = root.join(relative_path);
    let canonical_root = root.canonicalize().map_err(|_| not_found())?;
    let canonical = candidate.canonicalize().map_err(|_| not_found())?;

    if !canonical.starts_with(&canonical_root) || !canonical.is_file() {
        return Err(not_found());
    }

    Ok(canonical)
}

/// Content type for a container / file extension
#[must_use]
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// `Content-Disposition` value for a download
///
/// Carries an ASCII fallback in `filename` and the exact name in `filename*`.
#[must_use]
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

/// Expand a bare item identifier into a source URL
///
/// Absolute http(s) URLs pass through unchanged; anything else is substituted
/// into `template` at `{id}`.
#[must_use]
pub fn expand_source_ref(template: &str, item: &str) -> String {
    let item = item.trim();
    match url::Url::parse(item) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => item.to_string(),
        _ => template.replace("{id}", &urlencoding::encode(item)),
    }
}

/// Retrieval handle for a file below the output root (`/download/<relative path>`)
pub fn retrieval_url(root: &Path, file: &Path) -> Result<String> {
    let relative = file.strip_prefix(root).map_err(|_| {
        Error::Other(format!(
            "{} is not inside {}",
            file.display(),
            root.display()
        ))
    })?;

    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(urlencoding::encode(&s.to_string_lossy()).into_owned()),
            _ => None,
        })
        .collect();

    Ok(format!("/download/{}", segments.join("/")))
}
