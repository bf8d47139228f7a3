//! Error types for the personalization core
//!
//! Every store-facing call returns a typed `Result`; the presentation layer
//! decides how a failure is shown. Nothing here is meant to abort the process.

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for feed operations
#[derive(Error, Debug)]
pub enum FeedError {
    /// Update or retrieval requested for a user that has no record
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Feedback or lookup for an article the corpus does not hold
    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    /// A feature or preference vector with the wrong number of dimensions
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Transient connectivity failure talking to a backing store
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Query or row decoding failed
    #[error("Database error: {0}")]
    Database(String),

    /// Persona label outside the enumerated set
    #[error("Invalid persona: {0}")]
    InvalidPersona(String),

    /// Feedback score outside {-1, 0, 1}
    #[error("Invalid feedback score: {0}")]
    InvalidScore(i64),

    /// Style label that does not belong to its dimension's scale
    #[error("Invalid style label '{label}' for dimension {dimension}")]
    InvalidStyleLabel { dimension: String, label: String },

    /// Resource already exists
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Another writer changed the profile between read and write
    #[error("Concurrent update lost for user: {0}")]
    ConcurrentUpdate(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl FeedError {
    /// Whether the caller may reasonably offer a manual retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::StoreUnavailable(_) | FeedError::ConcurrentUpdate(_)
        )
    }
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Convert anyhow::Error to FeedError
impl From<anyhow::Error> for FeedError {
    fn from(err: anyhow::Error) -> Self {
        FeedError::Other(err.to_string())
    }
}

/// Connection-level libSQL failures are transient; everything else is a query error
impl From<libsql::Error> for FeedError {
    fn from(err: libsql::Error) -> Self {
        match err {
            libsql::Error::ConnectionFailed(msg) => FeedError::StoreUnavailable(msg),
            other => FeedError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeedError::UserNotFound("alice".to_string());
        assert_eq!(err.to_string(), "User not found: alice");

        let err = FeedError::DimensionMismatch {
            expected: 11,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 11, got 3");
    }

    #[test]
    fn test_transient_classification() {
        assert!(FeedError::StoreUnavailable("timeout".into()).is_transient());
        assert!(FeedError::ConcurrentUpdate("alice".into()).is_transient());
        assert!(!FeedError::UserNotFound("alice".into()).is_transient());
        assert!(!FeedError::InvalidScore(3).is_transient());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: FeedError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, FeedError::Other(ref msg) if msg == "boom"));
    }
}
