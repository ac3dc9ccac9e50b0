//! Coupon validity query.

use std::sync::Arc;

use kart_storage::{CouponReader, VALID_SOURCE_THRESHOLD};
use tracing::{debug, instrument};

use crate::code::is_well_formed;
use crate::error::DomainResult;
use crate::filter::{FilterStats, FilterStrategy, MembershipFilter};

/// Answers "is this coupon code valid?".
///
/// Holds an immutable [`MembershipFilter`] and the store used to resolve
/// filter hits. Shared across requests through `Arc` without locking.
pub struct Validator {
    filter: MembershipFilter,
    reader: Arc<dyn CouponReader>,
}

impl Validator {
    /// Builds the membership filter from `reader` and wraps it.
    pub async fn build(
        reader: Arc<dyn CouponReader>,
        false_positive_rate: f64,
    ) -> DomainResult<Self> {
        let filter = MembershipFilter::build(reader.as_ref(), false_positive_rate).await?;
        Ok(Self::new(filter, reader))
    }

    /// Creates a validator from an already built filter.
    pub fn new(filter: MembershipFilter, reader: Arc<dyn CouponReader>) -> Self {
        Self { filter, reader }
    }

    /// Returns whether `code` is a valid coupon.
    ///
    /// Malformed codes and filter misses are answered without touching the
    /// store. Store errors during resolution are returned as-is.
    #[instrument(skip(self), fields(strategy = %self.filter.strategy()))]
    pub async fn validate(&self, code: &str) -> DomainResult<bool> {
        if !is_well_formed(code) {
            record_outcome("malformed");
            return Ok(false);
        }

        if !self.filter.might_contain(code) {
            let valid = self.filter.strategy().absent_means_valid();
            record_outcome(if valid { "filter_valid" } else { "filter_invalid" });
            return Ok(valid);
        }

        metrics::counter!("kart_validate_store_lookups_total").increment(1);
        let source_count = match self.reader.source_count(code).await {
            Ok(count) => count,
            Err(e) => {
                record_outcome("error");
                return Err(e.into());
            }
        };
        debug!(?source_count, "Resolved filter hit against store");

        let valid = source_count.is_some_and(|count| count >= VALID_SOURCE_THRESHOLD);
        record_outcome(if valid { "store_valid" } else { "store_invalid" });
        Ok(valid)
    }

    pub fn strategy(&self) -> FilterStrategy {
        self.filter.strategy()
    }

    pub fn stats(&self) -> FilterStats {
        self.filter.stats()
    }

    /// The store used to resolve filter hits.
    pub fn reader(&self) -> &Arc<dyn CouponReader> {
        &self.reader
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("filter", &self.filter.stats())
            .finish_non_exhaustive()
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("kart_validate_requests_total", "outcome" => outcome).increment(1);
}
