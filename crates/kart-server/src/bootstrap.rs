//! Service startup: optional migration and validator construction.

use std::sync::Arc;

use kart_domain::{DomainResult, IngestOrchestrator, MigrationOutcome, Validator};
use kart_storage::{CouponReader, IngestStore};
use tracing::{info, warn};

use crate::config::{ConfigLoadError, FilterSettings, IngestSettings};

/// Errors raised while bootstrapping the service.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error(transparent)]
    Domain(#[from] kart_domain::DomainError),
}

/// Runs the ingestion pipeline and logs the resulting coupon distribution.
///
/// `force` overrides `settings.force` when true.
pub async fn run_migration<S>(
    store: Arc<S>,
    settings: &IngestSettings,
    force: bool,
) -> Result<MigrationOutcome, BootstrapError>
where
    S: IngestStore + CouponReader,
{
    let source = settings.source_location()?;
    let mut orchestrator =
        IngestOrchestrator::new(Arc::clone(&store), source, settings.ingest_config(force))?;
    let outcome = orchestrator.run().await?;

    match &outcome {
        MigrationOutcome::Skipped { existing_coupons } => {
            info!(existing_coupons, "Migration skipped");
        }
        MigrationOutcome::Completed(summary) => {
            for load in &summary.loads {
                info!(source_id = %load.source_id, rows = load.rows_written, "Source loaded");
            }
        }
    }

    log_distribution(store.as_ref()).await;
    Ok(outcome)
}

/// Logs how many coupons fall into each class. Failures only warn.
pub async fn log_distribution<R: CouponReader + ?Sized>(reader: &R) {
    match reader.coupon_counts().await {
        Ok(counts) => info!(
            total = counts.total(),
            valid = counts.valid,
            invalid = counts.invalid,
            "Coupon distribution"
        ),
        Err(e) => warn!(error = %e, "Failed to read coupon distribution"),
    }
}

/// Builds the shared validator.
pub async fn build_validator(
    reader: Arc<dyn CouponReader>,
    settings: &FilterSettings,
) -> DomainResult<Arc<Validator>> {
    let validator = Validator::build(reader, settings.false_positive_rate).await?;
    let stats = validator.stats();
    info!(
        strategy = %stats.strategy,
        encoded = stats.encoded_count,
        bits = stats.num_bits,
        hashes = stats.num_hashes,
        "Validator ready"
    );
    Ok(Arc::new(validator))
}
