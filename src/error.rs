//! Error types for media-relay
//!
//! This module provides the error taxonomy for the library:
//! - Relay failures classified for the retry loop ([`RelayError`], [`ErrorKind`])
//! - Collaborator failures (resolver, transcoder, packager)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for media-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Client request failed validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Stream relay failure
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Resolver could not produce a playable descriptor
    #[error("resolver failed for {source_ref}: {reason}")]
    Resolver {
        /// The source reference that failed to resolve
        source_ref: String,
        /// Why resolution failed
        reason: String,
    },

    /// Archive packaging failed after all jobs finished
    #[error("packaging failed for {archive}: {reason}")]
    Packaging {
        /// The archive that could not be produced
        archive: PathBuf,
        /// Why packaging failed
        reason: String,
    },

    /// Operation was cancelled (client disconnect or shutdown)
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested artifact or resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// Network error outside of the relay state machine
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// External tool execution failed (yt-dlp, ffmpeg)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unsupported selector)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures raised by the stream relay
///
/// Only [`RelayError::FatalHttp`], [`RelayError::ObjectChanged`] and
/// [`RelayError::ExhaustedRetries`] ever leave the relay; the transient variants
/// are absorbed by the retry loop and end up as the `last` error of an exhausted relay.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The direct URL expired or was refused (401/403)
    #[error("direct URL rejected with HTTP {status} (expired or unauthorized)")]
    TransientExpired {
        /// HTTP status returned by the origin
        status: u16,
    },

    /// Timeout, connection failure, reset, or rate limiting
    #[error("transient network failure: {reason}")]
    TransientNetwork {
        /// Description of the network failure
        reason: String,
    },

    /// Non-retryable HTTP status
    #[error("origin returned HTTP {status}")]
    FatalHttp {
        /// HTTP status returned by the origin
        status: u16,
    },

    /// A resumed attempt served a different object than the one partly delivered
    #[error("origin object changed after {delivered} bytes were delivered: {reason}")]
    ObjectChanged {
        /// Bytes already delivered to the consumer
        delivered: u64,
        /// What did not match
        reason: String,
    },

    /// Every attempt failed with a transient error
    #[error("gave up after {attempts} attempts, last error: {last}")]
    ExhaustedRetries {
        /// Number of attempts performed
        attempts: u32,
        /// The last transient error observed
        last: Box<RelayError>,
    },
}

/// Copyable failure classification, stored in retry state and reported in events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Stale URL / 403-class
    TransientExpired,
    /// Timeout, reset, rate limiting
    TransientNetwork,
    /// Other 4xx/5xx
    FatalHttp,
    /// Terminal after max attempts
    ExhaustedRetries,
    /// Collaborator could not extract metadata
    ResolverFailure,
    /// Archive step failed
    PackagingFailure,
}

impl RelayError {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::TransientExpired { .. } => ErrorKind::TransientExpired,
            RelayError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            RelayError::FatalHttp { .. } | RelayError::ObjectChanged { .. } => {
                ErrorKind::FatalHttp
            }
            RelayError::ExhaustedRetries { .. } => ErrorKind::ExhaustedRetries,
        }
    }

    /// Build a transient network error from a reqwest failure
    pub fn network(err: &reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            format!("timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        RelayError::TransientNetwork { reason }
    }
}

impl Error {
    /// Failure classification, when the error belongs to the relay/batch taxonomy
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Relay(e) => Some(e.kind()),
            Error::Resolver { .. } => Some(ErrorKind::ResolverFailure),
            Error::Packaging { .. } => Some(ErrorKind::PackagingFailure),
            _ => None,
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "not found: playlist.zip"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_request")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("invalid_request", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidRequest(_) => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 499-style client aborts have no standard code; report as 503
            Error::Cancelled => 503,
            Error::ShuttingDown => 503,
            Error::ExternalTool(_) => 503,

            // 502 Bad Gateway - Upstream failures
            Error::Relay(RelayError::ExhaustedRetries { .. }) => 504,
            Error::Relay(_) => 502,
            Error::Resolver { .. } => 502,
            Error::Network(_) => 502,

            // 500 Internal Server Error - Server-side issues
            Error::Packaging { .. } => 500,
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // 501 Not Implemented - Feature not supported
            Error::NotSupported(_) => 501,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Relay(e) => match e {
                RelayError::TransientExpired { .. } => "url_expired",
                RelayError::TransientNetwork { .. } => "network_error",
                RelayError::FatalHttp { .. } => "upstream_http_error",
                RelayError::ObjectChanged { .. } => "upstream_object_changed",
                RelayError::ExhaustedRetries { .. } => "retries_exhausted",
            },
            Error::Resolver { .. } => "resolver_failure",
            Error::Packaging { .. } => "packaging_failure",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Relay(RelayError::FatalHttp { status }) => Some(serde_json::json!({
                "upstream_status": status,
            })),
            Error::Relay(RelayError::ExhaustedRetries { attempts, last }) => {
                Some(serde_json::json!({
                    "attempts": attempts,
                    "last_error": last.kind(),
                }))
            }
            Error::Resolver { source_ref, .. } => Some(serde_json::json!({
                "source": source_ref,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
