//! Error types for the object store client

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while transferring data to or from remote storage
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Any other object store failure
    #[error("Object store request for {uri} failed: {source}")]
    ObjectStore {
        uri: String,
        #[source]
        source: object_store::Error,
    },

    /// HTTP request could not be completed
    #[error("HTTP request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP server answered with a non-success status
    #[error("HTTP request for {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    /// Local file could not be read or written
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request cannot be expressed against this store
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A backend could not be built from the configuration
    #[error("Failed to configure object store: {0}")]
    Config(String),
}

impl StoreError {
    /// Wraps an `object_store` error, keeping "not found" distinguishable
    pub fn object_store(uri: impl Into<String>, source: object_store::Error) -> Self {
        let uri = uri.into();
        match source {
            object_store::Error::NotFound { .. } => Self::NotFound(uri),
            source => Self::ObjectStore { uri, source },
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this error means the remote object is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::HttpStatus { status: 404, .. })
    }
}
