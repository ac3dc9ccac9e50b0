//! Storage error types.

use std::time::Duration;

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Transaction error.
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Bulk copy into the staging area failed.
    #[error("bulk copy error: {message}")]
    CopyError { message: String },

    /// Query exceeded its configured timeout.
    #[error("query timeout: {operation} exceeded {timeout:?}")]
    QueryTimeout { operation: String, timeout: Duration },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl StorageError {
    /// Returns true if the error indicates the backend could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionError { .. } | StorageError::QueryTimeout { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_mentions_operation() {
        let err = StorageError::QueryTimeout {
            operation: "source_count".to_string(),
            timeout: Duration::from_secs(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("source_count"));
        assert!(msg.contains("3s"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_query_error_is_not_unavailable() {
        let err = StorageError::QueryError {
            message: "syntax".to_string(),
        };
        assert!(!err.is_unavailable());
    }
}
