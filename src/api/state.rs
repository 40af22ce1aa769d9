//! Application state for the API server

use crate::{Config, MediaRelay};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clones).
#[derive(Clone)]
pub struct AppState {
    /// The service facade
    pub service: Arc<MediaRelay>,

    /// Configuration snapshot taken at startup
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<MediaRelay>, config: Arc<Config>) -> Self {
        Self { service, config }
    }
}
