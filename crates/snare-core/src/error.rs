//! Core error types.

use thiserror::Error;

/// Errors raised by core evaluation and by store collaborators.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A rule or path pattern could not be parsed.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A JSON path expression could not be parsed.
    #[error("Invalid JSON path '{0}'")]
    InvalidPath(String),

    /// A URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The storage collaborator failed.
    #[error("Store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CoreError {
    /// Wraps any storage backend error.
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        CoreError::Store(Box::new(err))
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
