//! Merges staging partitions into the coupon table.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use kart_storage::IngestStore;
use tracing::{debug, info, instrument};

use crate::error::{DomainError, DomainResult};

/// Result of aggregating every partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateReport {
    pub partitions: u32,
    pub coupons_inserted: u64,
}

/// Runs partition merges on a bounded pool of workers.
pub struct PartitionAggregator<S> {
    store: Arc<S>,
    partition_count: u32,
    workers: usize,
}

impl<S: IngestStore> PartitionAggregator<S> {
    /// Creates an aggregator. `workers` is clamped to `[1, partition_count]`.
    pub fn new(store: Arc<S>, partition_count: u32, workers: usize) -> Self {
        let workers = workers.clamp(1, partition_count.max(1) as usize);
        Self {
            store,
            partition_count,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Merges one partition. Re-running it inserts nothing new.
    #[instrument(skip(self))]
    pub async fn aggregate_partition(&self, partition_id: u32) -> DomainResult<u64> {
        let inserted = self
            .store
            .aggregate_partition(partition_id)
            .await
            .map_err(|source| DomainError::PartitionFailed {
                partition_id,
                source,
            })?;
        metrics::counter!("kart_ingest_partitions_total").increment(1);
        debug!(partition_id, inserted, "Partition aggregated");
        Ok(inserted)
    }

    /// Merges every partition, at most `workers` at a time.
    ///
    /// The first failure stops the run; merges still in flight are dropped.
    pub async fn aggregate_all(&self) -> DomainResult<AggregateReport> {
        info!(
            partitions = self.partition_count,
            workers = self.workers,
            "Aggregating partitions"
        );

        let mut merges = stream::iter(0..self.partition_count)
            .map(|partition_id| self.aggregate_partition(partition_id))
            .buffer_unordered(self.workers);

        let mut coupons_inserted = 0;
        let mut done = 0;
        while let Some(result) = merges.next().await {
            coupons_inserted += result?;
            done += 1;
            info!(done, total = self.partition_count, "Partition progress");
        }

        Ok(AggregateReport {
            partitions: self.partition_count,
            coupons_inserted,
        })
    }
}
