//! Sequences one ingestion run.
//!
//! ```text
//! Idle → CheckNeeded ─┬─► Skipped
//!                     └─► StagingCreated → Loading → Aggregating → Cleanup → Done
//! ```
//!
//! A failure in any state still attempts to drop the staging area before
//! the original error is returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kart_storage::IngestStore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::aggregator::PartitionAggregator;
use super::loader::{LoadReport, StagingLoader};
use super::source::SourceLocation;
use super::{CancellationToken, IngestConfig};
use crate::error::{DomainError, DomainResult};
use crate::partition::Partitioner;

/// States of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Idle,
    CheckNeeded,
    Skipped,
    StagingCreated,
    Loading,
    Aggregating,
    Cleanup,
    Done,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    /// One report per source file, ordered by source id.
    pub loads: Vec<LoadReport>,
    pub rows_staged: u64,
    pub partitions: u32,
    pub coupons_inserted: u64,
    pub elapsed: Duration,
}

/// Outcome of [`IngestOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The coupon table already had data and `force` was not set.
    Skipped { existing_coupons: u64 },
    Completed(MigrationSummary),
}

/// Runs staging, loading, aggregation and cleanup against one store.
pub struct IngestOrchestrator<S> {
    store: Arc<S>,
    source: SourceLocation,
    config: IngestConfig,
    partitioner: Partitioner,
    state: MigrationState,
}

impl<S: IngestStore> IngestOrchestrator<S> {
    pub fn new(store: Arc<S>, source: SourceLocation, config: IngestConfig) -> DomainResult<Self> {
        config.validate()?;
        let partitioner = Partitioner::new(config.partition_count)?;
        Ok(Self {
            store,
            source,
            config,
            partitioner,
            state: MigrationState::Idle,
        })
    }

    /// Current state of the run.
    pub fn state(&self) -> MigrationState {
        self.state
    }

    fn transition(&mut self, next: MigrationState) {
        debug!(from = ?self.state, to = ?next, "Migration state change");
        self.state = next;
    }

    /// Runs the migration if needed.
    #[instrument(skip(self), fields(force = self.config.force))]
    pub async fn run(&mut self) -> DomainResult<MigrationOutcome> {
        let started = Instant::now();
        self.transition(MigrationState::CheckNeeded);

        if self.config.force {
            info!("Force flag set, truncating coupon table");
            self.store.truncate_coupons().await?;
        } else {
            let existing_coupons = self.store.coupon_total().await?;
            if existing_coupons > 0 {
                info!(existing_coupons, "Coupon table already populated, skipping migration");
                self.transition(MigrationState::Skipped);
                return Ok(MigrationOutcome::Skipped { existing_coupons });
            }
        }

        match self.execute(started).await {
            Ok(summary) => {
                self.transition(MigrationState::Done);
                info!(
                    coupons = summary.coupons_inserted,
                    rows_staged = summary.rows_staged,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Migration completed"
                );
                Ok(MigrationOutcome::Completed(summary))
            }
            Err(e) => {
                warn!(state = ?self.state, error = %e, "Migration failed");
                self.release_staging().await;
                Err(e)
            }
        }
    }

    /// Drops the staging area and restores table maintenance. Failures only warn.
    async fn release_staging(&self) {
        if let Err(e) = self.store.drop_staging().await {
            warn!(error = %e, "Failed to drop staging area");
        }
        if let Err(e) = self.store.set_table_maintenance(true).await {
            warn!(error = %e, "Failed to re-enable autovacuum");
        }
    }

    async fn execute(&mut self, started: Instant) -> DomainResult<MigrationSummary> {
        self.store.create_staging().await?;
        self.transition(MigrationState::StagingCreated);
        if let Err(e) = self.store.set_table_maintenance(false).await {
            warn!(error = %e, "Failed to disable autovacuum");
        }

        self.transition(MigrationState::Loading);
        let loads = self.load_all().await?;
        let rows_staged = loads.iter().map(|l| l.rows_written).sum();
        info!(rows_staged, files = loads.len(), "All source files staged");

        self.transition(MigrationState::Aggregating);
        let aggregator = PartitionAggregator::new(
            Arc::clone(&self.store),
            self.partitioner.count(),
            self.config.workers,
        );
        let aggregate = aggregator.aggregate_all().await?;

        self.transition(MigrationState::Cleanup);
        self.release_staging().await;

        Ok(MigrationSummary {
            loads,
            rows_staged,
            partitions: aggregate.partitions,
            coupons_inserted: aggregate.coupons_inserted,
            elapsed: started.elapsed(),
        })
    }

    /// Loads every source file concurrently.
    ///
    /// The first failure cancels the other loaders and is returned once
    /// all of them have stopped.
    async fn load_all(&self) -> DomainResult<Vec<LoadReport>> {
        let loader = StagingLoader::new(
            Arc::clone(&self.store),
            self.partitioner,
            self.config.batch_size,
        );
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for file_name in &self.config.files {
            let loader = loader.clone();
            let source = self.source.clone();
            let file_name = file_name.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { loader.load(&source, &file_name, &cancel).await });
        }

        let mut loads = Vec::with_capacity(self.config.files.len());
        let mut first_error: Option<DomainError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| DomainError::TaskFailed {
                    message: e.to_string(),
                })
                .and_then(|r| r);
            match result {
                Ok(report) => loads.push(report),
                Err(e) => {
                    cancel.cancel();
                    let replace = match &first_error {
                        None => true,
                        Some(DomainError::Cancelled) => !matches!(e, DomainError::Cancelled),
                        Some(_) => false,
                    };
                    if replace {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        loads.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(loads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kart_storage::{Coupon, MemoryCouponStore};

    #[tokio::test]
    async fn test_skips_when_populated() {
        let store = Arc::new(MemoryCouponStore::with_coupons([Coupon::new(
            "SAVE1000",
            ["couponbase1", "couponbase2"],
        )]));
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = IngestOrchestrator::new(
            store.clone(),
            SourceLocation::local(dir.path()),
            IngestConfig::default(),
        )
        .unwrap();

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Skipped { existing_coupons: 1 });
        assert_eq!(orchestrator.state(), MigrationState::Skipped);
        assert!(!store.has_staging());
    }

    #[tokio::test]
    async fn test_missing_source_fails_and_drops_staging() {
        let store = MemoryCouponStore::new_shared();
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = IngestOrchestrator::new(
            store.clone(),
            SourceLocation::local(dir.path()),
            IngestConfig::default().with_files(["missing.gz"]),
        )
        .unwrap();

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(DomainError::SourceUnreachable { .. })));
        assert_eq!(orchestrator.state(), MigrationState::Loading);
        assert!(!store.has_staging());
        assert!(!store.maintenance_paused());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = IngestOrchestrator::new(
            MemoryCouponStore::new_shared(),
            SourceLocation::local("."),
            IngestConfig::default().with_workers(0),
        );
        assert!(matches!(result, Err(DomainError::InvalidConfig { .. })));
    }
}
