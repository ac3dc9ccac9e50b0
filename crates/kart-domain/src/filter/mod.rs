//! Adaptive membership filter over the minority coupon class.
//!
//! The builder reads per-class counts, encodes whichever class is smaller
//! into a [`BloomFilter`], and records which class it encoded so the
//! validator can interpret a filter miss correctly.
//!
//! | Strategy            | Filter holds  | Miss means | Hit means         |
//! |---------------------|---------------|------------|-------------------|
//! | `MinorityIncluded`  | valid codes   | invalid    | ask the store     |
//! | `MajorityExcluded`  | invalid codes | valid      | ask the store     |

pub mod bloom;

use futures::TryStreamExt;
use kart_storage::{CouponClass, CouponCounts, CouponReader};
use tracing::{info, instrument};

use crate::error::{DomainError, DomainResult};
pub use bloom::BloomFilter;

/// Default target false-positive probability.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.001;

/// Progress is logged every this many inserted codes.
const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Which coupon class the filter encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    /// The filter holds the valid class. Logged as "positive".
    MinorityIncluded,
    /// The filter holds the invalid class. Logged as "negative".
    MajorityExcluded,
}

impl FilterStrategy {
    /// Picks the strategy for the given class distribution.
    ///
    /// Equal counts encode the valid class.
    pub fn select(counts: &CouponCounts) -> Self {
        if counts.invalid < counts.valid {
            FilterStrategy::MajorityExcluded
        } else {
            FilterStrategy::MinorityIncluded
        }
    }

    /// The coupon class stored in the filter.
    pub fn encoded_class(&self) -> CouponClass {
        match self {
            FilterStrategy::MinorityIncluded => CouponClass::Valid,
            FilterStrategy::MajorityExcluded => CouponClass::Invalid,
        }
    }

    /// Validity implied by a filter miss.
    pub fn absent_means_valid(&self) -> bool {
        matches!(self, FilterStrategy::MajorityExcluded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterStrategy::MinorityIncluded => "positive",
            FilterStrategy::MajorityExcluded => "negative",
        }
    }
}

impl std::fmt::Display for FilterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a built filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStats {
    pub strategy: FilterStrategy,
    /// Class distribution observed when the filter was built.
    pub counts: CouponCounts,
    pub encoded_count: u64,
    pub num_bits: u64,
    pub num_hashes: u32,
    pub false_positive_rate: f64,
}

/// An immutable bloom filter tagged with the class it encodes.
#[derive(Debug, Clone)]
pub struct MembershipFilter {
    strategy: FilterStrategy,
    filter: BloomFilter,
    counts: CouponCounts,
    encoded_count: u64,
    false_positive_rate: f64,
}

impl MembershipFilter {
    /// Builds the filter from the coupon table.
    ///
    /// Any store error while counting or scanning fails the build.
    #[instrument(skip(reader))]
    pub async fn build<R>(reader: &R, false_positive_rate: f64) -> DomainResult<Self>
    where
        R: CouponReader + ?Sized,
    {
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(DomainError::InvalidConfig {
                message: format!(
                    "false positive rate must be in (0, 1), got {false_positive_rate}"
                ),
            });
        }

        let counts = reader.coupon_counts().await?;
        let strategy = FilterStrategy::select(&counts);
        let class = strategy.encoded_class();
        let expected = counts.of(class);

        info!(
            invalid = counts.invalid,
            valid = counts.valid,
            strategy = %strategy,
            encoded_class = class.as_str(),
            "Building membership filter"
        );

        let mut filter = BloomFilter::with_estimates(expected, false_positive_rate);
        let mut inserted: u64 = 0;

        if expected > 0 {
            let mut codes = reader.stream_codes(class);
            while let Some(code) = codes.try_next().await? {
                filter.insert(code.as_bytes());
                inserted += 1;
                if inserted % PROGRESS_INTERVAL == 0 {
                    info!(inserted, expected, "Membership filter progress");
                }
            }
        }

        info!(
            strategy = %strategy,
            inserted,
            num_bits = filter.num_bits(),
            num_hashes = filter.num_hashes(),
            "Membership filter ready"
        );

        Ok(Self {
            strategy,
            filter,
            counts,
            encoded_count: inserted,
            false_positive_rate,
        })
    }

    pub fn strategy(&self) -> FilterStrategy {
        self.strategy
    }

    /// Tests whether the code may belong to the encoded class.
    #[inline]
    pub fn might_contain(&self, code: &str) -> bool {
        self.filter.contains(code.as_bytes())
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            strategy: self.strategy,
            counts: self.counts,
            encoded_count: self.encoded_count,
            num_bits: self.filter.num_bits(),
            num_hashes: self.filter.num_hashes(),
            false_positive_rate: self.false_positive_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, BoxStream, StreamExt};
    use kart_storage::{Coupon, MemoryCouponStore, StorageError, StorageResult};

    /// Reader that fails while counting, or partway through the code scan.
    struct BrokenReader {
        fail_counts: bool,
    }

    #[async_trait::async_trait]
    impl CouponReader for BrokenReader {
        async fn coupon_counts(&self) -> StorageResult<CouponCounts> {
            if self.fail_counts {
                Err(StorageError::ConnectionError {
                    message: "connection refused".to_string(),
                })
            } else {
                Ok(CouponCounts { invalid: 10, valid: 3 })
            }
        }

        fn stream_codes(&self, _class: CouponClass) -> BoxStream<'_, StorageResult<String>> {
            stream::iter(vec![
                Ok("SAVE1000".to_string()),
                Err(StorageError::QueryError {
                    message: "connection reset".to_string(),
                }),
                Ok("DISCOUNT50".to_string()),
            ])
            .boxed()
        }

        async fn source_count(&self, _code: &str) -> StorageResult<Option<u32>> {
            Ok(None)
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    fn invalid(i: usize) -> Coupon {
        Coupon::new(format!("INV{i:05}"), ["couponbase1"])
    }

    #[test]
    fn test_strategy_tie_break_encodes_valid() {
        let counts = CouponCounts { invalid: 5, valid: 5 };
        assert_eq!(FilterStrategy::select(&counts), FilterStrategy::MinorityIncluded);
    }

    #[test]
    fn test_strategy_selection() {
        let more_invalid = CouponCounts { invalid: 100, valid: 2 };
        assert_eq!(
            FilterStrategy::select(&more_invalid),
            FilterStrategy::MinorityIncluded
        );
        let more_valid = CouponCounts { invalid: 2, valid: 100 };
        assert_eq!(
            FilterStrategy::select(&more_valid),
            FilterStrategy::MajorityExcluded
        );
        assert_eq!(
            FilterStrategy::select(&CouponCounts::default()),
            FilterStrategy::MinorityIncluded
        );
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(FilterStrategy::MinorityIncluded.to_string(), "positive");
        assert_eq!(FilterStrategy::MajorityExcluded.to_string(), "negative");
    }

    #[tokio::test]
    async fn test_build_encodes_minority_class() {
        let mut coupons: Vec<Coupon> = (0..100).map(invalid).collect();
        coupons.push(Coupon::new("SAVE1000", ["couponbase1", "couponbase2"]));
        coupons.push(Coupon::new("DISCOUNT50", ["couponbase2", "couponbase3"]));
        let store = MemoryCouponStore::with_coupons(coupons);

        let filter = MembershipFilter::build(&store, 0.001).await.unwrap();
        let stats = filter.stats();
        assert_eq!(stats.strategy, FilterStrategy::MinorityIncluded);
        assert_eq!(stats.encoded_count, 2);
        assert!(filter.might_contain("SAVE1000"));
        assert!(filter.might_contain("DISCOUNT50"));
    }

    #[tokio::test]
    async fn test_build_on_empty_store() {
        let store = MemoryCouponStore::new();
        let filter = MembershipFilter::build(&store, 0.001).await.unwrap();
        assert_eq!(filter.strategy(), FilterStrategy::MinorityIncluded);
        assert_eq!(filter.stats().encoded_count, 0);
        assert!(!filter.might_contain("SAVE1000"));
    }

    #[tokio::test]
    async fn test_build_records_class_counts() {
        let store = MemoryCouponStore::with_coupons([
            Coupon::new("SAVE1000", ["couponbase1", "couponbase2"]),
            invalid(1),
            invalid(2),
        ]);
        let stats = MembershipFilter::build(&store, 0.001).await.unwrap().stats();
        assert_eq!(stats.counts, CouponCounts { invalid: 2, valid: 1 });
    }

    #[tokio::test]
    async fn test_build_fails_when_counts_fail() {
        let reader = BrokenReader { fail_counts: true };
        let result = MembershipFilter::build(&reader, 0.001).await;
        assert!(matches!(
            result,
            Err(DomainError::Storage(StorageError::ConnectionError { .. }))
        ));
    }

    #[tokio::test]
    async fn test_build_fails_on_scan_error() {
        let reader = BrokenReader { fail_counts: false };
        let result = MembershipFilter::build(&reader, 0.001).await;
        assert!(matches!(
            result,
            Err(DomainError::Storage(StorageError::QueryError { .. }))
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_bad_rate() {
        let store = MemoryCouponStore::new();
        for rate in [0.0, 1.0, -0.5, f64::NAN] {
            let result = MembershipFilter::build(&store, rate).await;
            assert!(matches!(result, Err(DomainError::InvalidConfig { .. })));
        }
    }
}
