//! Error types for the OMS bridge core library.

use thiserror::Error;

/// Result type alias using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for OMS bridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Inbound report failed validation
    #[error("Invalid telegram report: {0}")]
    Report(#[from] crate::report::ReportError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
