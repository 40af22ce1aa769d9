//! Shutdown coordination.

use super::MediaRelay;
use crate::error::Result;
use std::time::Duration;

/// How long to wait for the cleanup task after cancelling it
const CLEANUP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl MediaRelay {
    /// Gracefully shut down the service
    ///
    /// 1. Cancels the shutdown token: new requests are refused, running
    ///    batches and relays stop at their next await point
    /// 2. Stops the cleanup task and waits for it (bounded)
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(active_sessions = self.sessions.len(), "Initiating graceful shutdown");
        self.shutdown.cancel();

        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            match tokio::time::timeout(CLEANUP_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => tracing::debug!("Cleanup task stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Cleanup task ended abnormally"),
                Err(_) => tracing::warn!("Timeout waiting for cleanup task to stop"),
            }
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
