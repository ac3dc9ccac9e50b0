//! Ingestion pipeline: source files → staging area → coupon table.
//!
//! ```text
//! couponbase1.gz ─┐
//! couponbase2.gz ─┼─ StagingLoader (one task each) ─► coupon_staging
//! couponbase3.gz ─┘                                        │
//!                          PartitionAggregator (N workers) ◄┘
//!                                    │
//!                                    ▼
//!                                 coupons
//! ```

pub mod aggregator;
pub mod loader;
pub mod orchestrator;
pub mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::partition::DEFAULT_PARTITION_COUNT;

pub use aggregator::{AggregateReport, PartitionAggregator};
pub use loader::{LoadReport, StagingLoader};
pub use orchestrator::{IngestOrchestrator, MigrationOutcome, MigrationState, MigrationSummary};
pub use source::SourceLocation;

/// Default number of concurrent aggregation workers.
pub const DEFAULT_WORKERS: usize = 8;

/// Default number of rows per bulk copy.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default source file names.
pub const DEFAULT_SOURCE_FILES: [&str; 3] = ["couponbase1.gz", "couponbase2.gz", "couponbase3.gz"];

/// Logical source id for a file name: the name without its `.gz` suffix.
pub fn source_id_for(file_name: &str) -> &str {
    file_name.strip_suffix(".gz").unwrap_or(file_name)
}

/// Configuration for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Source file names, resolved against the [`SourceLocation`].
    pub files: Vec<String>,
    /// Truncate existing coupons and reload.
    pub force: bool,
    /// Number of partitions.
    pub partition_count: u32,
    /// Maximum concurrent partition merges.
    pub workers: usize,
    /// Rows per bulk copy.
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            files: DEFAULT_SOURCE_FILES.iter().map(|f| f.to_string()).collect(),
            force: false,
            partition_count: DEFAULT_PARTITION_COUNT,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl IngestConfig {
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_partition_count(mut self, partition_count: u32) -> Self {
        self.partition_count = partition_count;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Checks the run parameters.
    pub fn validate(&self) -> DomainResult<()> {
        let invalid = |message: &str| {
            Err(DomainError::InvalidConfig {
                message: message.to_string(),
            })
        };
        if self.files.is_empty() {
            return invalid("at least one source file is required");
        }
        if self.partition_count == 0 {
            return invalid("partition count must be at least 1");
        }
        if self.workers == 0 {
            return invalid("worker count must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch size must be at least 1");
        }
        Ok(())
    }
}

/// Cooperative cancellation flag shared by the tasks of one run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_strips_gz() {
        assert_eq!(source_id_for("couponbase1.gz"), "couponbase1");
        assert_eq!(source_id_for("plain"), "plain");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.files.len(), 3);
        assert_eq!(config.workers, 8);
        assert_eq!(config.batch_size, 10_000);
    }

    #[test]
    fn test_config_rejects_zero_values() {
        let base = IngestConfig::default();
        assert!(base.clone().with_workers(0).validate().is_err());
        assert!(base.clone().with_batch_size(0).validate().is_err());
        assert!(base.clone().with_partition_count(0).validate().is_err());
        assert!(base
            .with_files(Vec::<String>::new())
            .validate()
            .is_err());
    }

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
