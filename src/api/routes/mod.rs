//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`relay`] - single-item downloads
//! - [`batch`] - batch downloads streamed as server-sent events
//! - [`files`] - retrieval of produced artifacts
//! - [`system`] - banner, health, OpenAPI

mod batch;
mod files;
mod relay;
mod system;

pub use batch::*;
pub use files::*;
pub use relay::*;
pub use system::*;
