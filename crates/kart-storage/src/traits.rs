//! Storage trait definitions and shared coupon types.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StorageResult;

/// Minimum number of distinct sources for a coupon to be valid.
pub const VALID_SOURCE_THRESHOLD: u32 = 2;

/// A row in the transient staging area.
///
/// One row exists per (code, source file) occurrence; the aggregator
/// collapses them into a single [`Coupon`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingRow {
    pub code: String,
    pub source_id: String,
    pub partition_id: u32,
}

impl StagingRow {
    pub fn new(code: impl Into<String>, source_id: impl Into<String>, partition_id: u32) -> Self {
        Self {
            code: code.into(),
            source_id: source_id.into(),
            partition_id,
        }
    }
}

/// An aggregated coupon: the distinct sources a code appeared in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    pub code: String,
    pub sources: BTreeSet<String>,
    pub source_count: u32,
}

impl Coupon {
    pub fn new<I, S>(code: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources: BTreeSet<String> = sources.into_iter().map(Into::into).collect();
        Self {
            code: code.into(),
            source_count: sources.len() as u32,
            sources,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.source_count >= VALID_SOURCE_THRESHOLD
    }
}

/// The two outcome classes of a stored coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouponClass {
    /// Appears in exactly one source.
    Invalid,
    /// Appears in at least [`VALID_SOURCE_THRESHOLD`] sources.
    Valid,
}

impl CouponClass {
    /// Classifies a source count.
    pub fn of(source_count: u32) -> Self {
        if source_count >= VALID_SOURCE_THRESHOLD {
            CouponClass::Valid
        } else {
            CouponClass::Invalid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CouponClass::Invalid => "invalid",
            CouponClass::Valid => "valid",
        }
    }
}

/// Per-class coupon counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CouponCounts {
    pub invalid: u64,
    pub valid: u64,
}

impl CouponCounts {
    pub fn total(&self) -> u64 {
        self.invalid + self.valid
    }

    pub fn of(&self, class: CouponClass) -> u64 {
        match class {
            CouponClass::Invalid => self.invalid,
            CouponClass::Valid => self.valid,
        }
    }
}

/// Read-side access to the coupon table, used by the validator.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CouponReader: Send + Sync + 'static {
    /// Counts coupons per outcome class.
    async fn coupon_counts(&self) -> StorageResult<CouponCounts>;

    /// Streams every code of the given class.
    fn stream_codes(&self, class: CouponClass) -> BoxStream<'_, StorageResult<String>>;

    /// Returns the number of distinct sources for a code, or `None` if the
    /// code was never ingested.
    async fn source_count(&self, code: &str) -> StorageResult<Option<u32>>;

    /// Cheap round trip proving the store is reachable.
    async fn ping(&self) -> StorageResult<()>;
}

/// Write-side operations used by the ingestion pipeline.
#[async_trait]
pub trait IngestStore: Send + Sync + 'static {
    /// Total number of aggregated coupons.
    async fn coupon_total(&self) -> StorageResult<u64>;

    /// Removes every aggregated coupon.
    async fn truncate_coupons(&self) -> StorageResult<()>;

    /// Drops any leftover staging area and creates a fresh one.
    async fn create_staging(&self) -> StorageResult<()>;

    /// Bulk-appends rows to the staging area. Returns the number of rows written.
    async fn copy_staging_rows(&self, rows: &[StagingRow]) -> StorageResult<u64>;

    /// Merges one staging partition into the coupon table.
    ///
    /// Codes that already exist in the coupon table are left untouched.
    /// Returns the number of newly inserted coupons.
    async fn aggregate_partition(&self, partition_id: u32) -> StorageResult<u64>;

    /// Drops the staging area if it exists.
    async fn drop_staging(&self) -> StorageResult<()>;

    /// Toggles background maintenance on the tables touched by a bulk load.
    ///
    /// Backends without such maintenance treat this as a no-op.
    async fn set_table_maintenance(&self, _enabled: bool) -> StorageResult<()> {
        Ok(())
    }
}
