//! Source resolution
//!
//! A [`Resolver`] turns a source reference (page URL) and an optional format
//! selector into a fresh [`PlayableDescriptor`]. Every call may return a
//! different direct URL; callers never cache descriptors across attempts.

mod ytdlp;

pub use ytdlp::{UnavailableResolver, YtDlpResolver};

use crate::events::JobLogger;
use crate::types::PlayableDescriptor;
use async_trait::async_trait;

/// Trait for resolving a source reference into a playable descriptor
///
/// # Examples
///
/// ```no_run
/// use media_relay::events::TracingLogger;
/// use media_relay::resolver::{Resolver, YtDlpResolver};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let resolver = YtDlpResolver::from_path(None).expect("yt-dlp not found in PATH");
/// let logger = TracingLogger::new("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
///
/// let descriptor = resolver
///     .resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Some("18"), &logger)
///     .await?;
/// println!("{} ({})", descriptor.direct_url, descriptor.container);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `source_ref` into a descriptor
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolver`](crate::Error::Resolver) when metadata
    /// cannot be extracted or no playable format matches, and
    /// [`Error::ExternalTool`](crate::Error::ExternalTool) /
    /// [`Error::NotSupported`](crate::Error::NotSupported) when the backing
    /// tool cannot run.
    async fn resolve(
        &self,
        source_ref: &str,
        format_selector: Option<&str>,
        logger: &dyn JobLogger,
    ) -> crate::Result<PlayableDescriptor>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
