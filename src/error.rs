//! Error types for FileIngest
//!
//! Configuration problems are raised before any I/O starts and abort the
//! whole job. Streaming failures abort only the work unit that hit them.
//! Everything recoverable (missing roots, stale entries, close failures) is
//! logged through `tracing` instead of being turned into an error value.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for FileIngest operations
#[derive(Error, Debug)]
pub enum IngestError {
    /// Invalid user or programmatic configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// URI scheme that no storage driver handles
    #[error("Unsupported scheme: '{0}'")]
    UnsupportedScheme(String),

    /// Path does not exist on the storage system
    #[error("Path not found: {0}")]
    NotFound(String),

    /// I/O error outside of byte streaming (stat, mkdir, open)
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while moving file bytes; fatal to the containing unit
    #[error("Streaming failed for '{path}': {source}")]
    StreamingIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Could not reach or talk to a storage endpoint
    #[error("Connection error to '{host}': {message}")]
    Connection { host: String, message: String },

    /// Authentication rejected by the endpoint
    #[error("Authentication failed for '{user}@{host}': {message}")]
    Authentication {
        user: String,
        host: String,
        message: String,
    },

    /// Protocol-level failure reported by a remote storage system
    #[error("Remote storage error: {0}")]
    Remote(String),

    /// Wire encoding or decoding failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Operation the storage system cannot perform
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Error with additional context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a streaming error for the given source path
    pub fn streaming(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::StreamingIo {
            path: path.into(),
            source,
        }
    }

    /// Create a connection error
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(
        user: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Authentication {
            user: user.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &IngestError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error must abort the job before any I/O
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidConfiguration(_) | Self::UnsupportedScheme(_)
        )
    }

    /// Check if the error means the path is absent
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Self::NotFound(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type alias for FileIngest operations
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Codec(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| IngestError::io(path, e))
    }
}
