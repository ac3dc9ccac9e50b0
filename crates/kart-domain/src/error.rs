//! Domain error types for ingestion and validation.

use kart_storage::StorageError;
use thiserror::Error;

/// Domain-specific errors for ingestion and validation.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A source file could not be opened or downloaded.
    #[error("source '{source_name}' unreachable: {message}")]
    SourceUnreachable {
        source_name: String,
        message: String,
    },

    /// A source file could not be decompressed or read.
    #[error("failed to decompress '{source_name}': {message}")]
    Decompress {
        source_name: String,
        message: String,
    },

    /// Merging one staging partition into the coupon table failed.
    #[error("aggregation of partition {partition_id} failed: {source}")]
    PartitionFailed {
        partition_id: u32,
        source: StorageError,
    },

    /// Storage layer error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The run was cancelled because a sibling task failed.
    #[error("ingestion cancelled")]
    Cancelled,

    /// A spawned task panicked or was aborted.
    #[error("task failed: {message}")]
    TaskFailed { message: String },

    /// Invalid pipeline or filter configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_partition_failure_keeps_cause() {
        let err = DomainError::PartitionFailed {
            partition_id: 7,
            source: StorageError::QueryError {
                message: "disk full".to_string(),
            },
        };
        assert!(err.to_string().contains("partition 7"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: DomainError = StorageError::ConnectionError {
            message: "refused".to_string(),
        }
        .into();
        assert!(matches!(err, DomainError::Storage(_)));
        assert_eq!(err.to_string(), "database connection error: refused");
    }
}
