//! Error types for the proxy.

use std::path::PathBuf;

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    /// Feed ingestion error.
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage collaborator error.
    #[error("Storage error: {0}")]
    Store(#[from] snare_core::CoreError),

    /// Invalid proxy configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Proxy server error (bind failure, transport failure).
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// Certificate authority error type.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to generate a key pair or certificate.
    #[error("Failed to generate certificate: {0}")]
    Generation(String),

    /// A CA file does not exist.
    #[error("CA file not found: {0}")]
    Missing(PathBuf),

    /// Failed to read a CA file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Failed to write a CA file.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A CA file could not be decoded.
    #[error("Failed to decode {path}: {reason}")]
    Decode {
        /// Offending file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The private key is not an RSA key.
    #[error("CA private key in {0} is not an RSA key")]
    NotRsa(PathBuf),
}

/// Feed ingestion error type.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Feed or analytics body is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The feed document holds no target array.
    #[error("Feed has no target array at '{0}'")]
    NoTargets(String),

    /// The analytics document holds no group array.
    #[error("Analytics response has no group array at '{0}'")]
    NoGroups(String),

    /// A target object has no usable identifier.
    #[error("Target has no identifier in field '{0}'")]
    MissingId(String),

    /// Outbound HTTP call failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Outbound HTTP call returned a non-success status.
    #[error("Analytics request to {url} returned {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Returned status code.
        status: u16,
    },

    /// Storage collaborator failed.
    #[error("Store error: {0}")]
    Store(#[from] snare_core::CoreError),

    /// The proxy is shutting down.
    #[error("Ingestion cancelled")]
    Cancelled,
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
