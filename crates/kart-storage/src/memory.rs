//! In-memory storage implementation for testing and local development.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::instrument;

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    Coupon, CouponClass, CouponCounts, CouponReader, IngestStore, StagingRow,
};

/// In-memory implementation of [`CouponReader`] and [`IngestStore`].
///
/// Uses DashMap for concurrent access without a global lock. Staging rows
/// are bucketed by partition so that aggregation of one partition never
/// touches another partition's rows.
#[derive(Debug, Default)]
pub struct MemoryCouponStore {
    coupons: DashMap<String, Coupon>,
    staging: DashMap<u32, Vec<StagingRow>>,
    staging_exists: AtomicBool,
    maintenance_paused: AtomicBool,
    /// Number of `source_count` lookups served.
    lookups: AtomicU64,
}

impl MemoryCouponStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Creates a store pre-populated with aggregated coupons.
    pub fn with_coupons<I>(coupons: I) -> Self
    where
        I: IntoIterator<Item = Coupon>,
    {
        let store = Self::new();
        for coupon in coupons {
            store.insert_coupon(coupon);
        }
        store
    }

    /// Inserts a coupon directly, keeping an existing entry for the same code.
    pub fn insert_coupon(&self, coupon: Coupon) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.coupons.entry(coupon.code.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(coupon);
                true
            }
        }
    }

    /// Returns a copy of a stored coupon.
    pub fn get_coupon(&self, code: &str) -> Option<Coupon> {
        self.coupons.get(code).map(|c| c.value().clone())
    }

    /// Returns every stored coupon ordered by code.
    pub fn snapshot(&self) -> Vec<Coupon> {
        let mut all: Vec<Coupon> = self.coupons.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    /// Whether a staging area currently exists.
    pub fn has_staging(&self) -> bool {
        self.staging_exists.load(Ordering::Acquire)
    }

    /// Number of rows currently staged across all partitions.
    pub fn staged_row_count(&self) -> usize {
        self.staging.iter().map(|p| p.value().len()).sum()
    }

    /// Whether table maintenance is currently switched off.
    pub fn maintenance_paused(&self) -> bool {
        self.maintenance_paused.load(Ordering::Acquire)
    }

    /// Number of `source_count` lookups served since creation.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    fn require_staging(&self) -> StorageResult<()> {
        if self.has_staging() {
            Ok(())
        } else {
            Err(StorageError::QueryError {
                message: "staging area does not exist".to_string(),
            })
        }
    }
}

#[async_trait]
impl CouponReader for MemoryCouponStore {
    async fn coupon_counts(&self) -> StorageResult<CouponCounts> {
        let mut counts = CouponCounts::default();
        for coupon in self.coupons.iter() {
            match CouponClass::of(coupon.source_count) {
                CouponClass::Valid => counts.valid += 1,
                CouponClass::Invalid => counts.invalid += 1,
            }
        }
        Ok(counts)
    }

    fn stream_codes(&self, class: CouponClass) -> BoxStream<'_, StorageResult<String>> {
        // Collect up front so no DashMap shard guard is held across awaits.
        let codes: Vec<StorageResult<String>> = self
            .coupons
            .iter()
            .filter(|c| CouponClass::of(c.source_count) == class)
            .map(|c| Ok(c.code.clone()))
            .collect();
        stream::iter(codes).boxed()
    }

    async fn source_count(&self, code: &str) -> StorageResult<Option<u32>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.coupons.get(code).map(|c| c.source_count))
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl IngestStore for MemoryCouponStore {
    async fn coupon_total(&self) -> StorageResult<u64> {
        Ok(self.coupons.len() as u64)
    }

    async fn truncate_coupons(&self) -> StorageResult<()> {
        self.coupons.clear();
        Ok(())
    }

    async fn create_staging(&self) -> StorageResult<()> {
        self.staging.clear();
        self.staging_exists.store(true, Ordering::Release);
        Ok(())
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn copy_staging_rows(&self, rows: &[StagingRow]) -> StorageResult<u64> {
        self.require_staging()?;
        for row in rows {
            self.staging
                .entry(row.partition_id)
                .or_default()
                .push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self))]
    async fn aggregate_partition(&self, partition_id: u32) -> StorageResult<u64> {
        self.require_staging()?;

        let grouped: HashMap<String, BTreeSet<String>> = match self.staging.get(&partition_id) {
            Some(rows) => {
                let mut grouped: HashMap<String, BTreeSet<String>> = HashMap::new();
                for row in rows.value() {
                    grouped
                        .entry(row.code.clone())
                        .or_default()
                        .insert(row.source_id.clone());
                }
                grouped
            }
            None => return Ok(0),
        };

        let mut inserted = 0;
        for (code, sources) in grouped {
            if self.insert_coupon(Coupon::new(code, sources)) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn drop_staging(&self) -> StorageResult<()> {
        self.staging.clear();
        self.staging_exists.store(false, Ordering::Release);
        Ok(())
    }

    async fn set_table_maintenance(&self, enabled: bool) -> StorageResult<()> {
        self.maintenance_paused.store(!enabled, Ordering::Release);
        Ok(())
    }
}
