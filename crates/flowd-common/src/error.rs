//! Error types for flowd

use thiserror::Error;

/// Result type alias for flowd operations
pub type Result<T> = std::result::Result<T, FlowdError>;

/// Main error type for flowd
#[derive(Error, Debug)]
pub enum FlowdError {
    /// A message body is not a valid flow record, or a record failed to encode
    #[error("Invalid flow record JSON: {0}")]
    Codec(#[from] serde_json::Error),

    /// A page request outside the accepted bounds
    #[error("Invalid page request: {0}")]
    Page(String),
}
