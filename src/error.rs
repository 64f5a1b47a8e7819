//! Unified error handling for the geotrail library.
//!
//! Every fallible operation in the crate returns [`TrailError`], so callers
//! (the CLI, the HTTP layer, the refresh pipeline) can decide per variant
//! whether a failure skips one file, rejects one request, or aborts.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for geotrail operations.
#[derive(Debug, Error)]
pub enum TrailError {
    /// Filesystem error while reading or writing raw data
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Body or file is not a valid Overland GeoJSON batch
    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },
    /// Batch has no locations to store
    #[error("Batch contains no locations")]
    EmptyBatch,
    /// Timestamp could not be parsed as RFC 3339
    #[error("Invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },
    /// Request or CLI parameter out of range
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// HTTP/API error (alert delivery)
    #[error("HTTP error{}: {message}", status_code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrailError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrailError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        TrailError::MalformedPayload {
            message: message.into(),
        }
    }

    pub fn invalid_parameter(name: &str, message: impl Into<String>) -> Self {
        TrailError::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// True when the failure is caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TrailError::MalformedPayload { .. }
                | TrailError::EmptyBatch
                | TrailError::InvalidTimestamp { .. }
                | TrailError::InvalidParameter { .. }
        )
    }
}

/// Result type alias for geotrail operations.
pub type Result<T> = std::result::Result<T, TrailError>;

/// Extension trait for converting Option to TrailError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a malformed payload error.
    fn ok_or_malformed(self, message: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_malformed(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrailError::malformed(message))
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrailError::Internal {
            message: message.to_string(),
        })
    }
}
