//! Error types shared across the synchronisation engine.
//!
//! Store calls return [`StoreError`], which keeps "not found" distinct from
//! every other failure. Per-file outcomes of a batch are reported as
//! [`FailureKind`] values inside [`crate::sync::SyncFailure`]; they are never
//! raised past the engine boundary.

use thiserror::Error;

/// Errors from remote store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Object or bucket does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network, timeout, throttling or 5xx failure
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Credentials rejected or insufficient permissions
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Store client could not be built from the given configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for remote store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored or local document could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("malformed XML in {key}: {message}")]
    Xml { key: String, message: String },

    #[error("malformed JSON in {key}: {message}")]
    Json { key: String, message: String },

    #[error("{key} is missing required field '{field}'")]
    MissingField { key: String, field: &'static str },
}

impl DocumentError {
    pub fn xml(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Xml {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn json(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Json {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Why a single file (or aggregate document) failed on a single target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The key already holds different content; nothing was written.
    #[error("checksum conflict: stored {stored}, local {local}")]
    ContentConflict { stored: String, local: String },

    #[error("cannot read local file: {0}")]
    LocalRead(String),

    /// Replica skipped because the same file failed on the main target.
    #[error("skipped: upload to main target '{0}' failed")]
    MainTargetFailed(String),

    #[error("aggregate scan failed: {0}")]
    AggregateScan(String),

    #[error(transparent)]
    Document(#[from] DocumentError),
}
