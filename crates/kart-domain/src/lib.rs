//! kart-domain: Coupon ingestion and validation logic
//!
//! This crate contains the core coupon logic:
//! - Code format rules and deterministic partitioning
//! - Ingestion pipeline: source files → staging → partitioned aggregation
//! - Adaptive membership filter over the minority coupon class
//! - Validator combining the filter with authoritative store lookups
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                kart-domain                  │
//! ├─────────────────────────────────────────────┤
//! │  code.rs      - Code format rules           │
//! │  partition.rs - FNV-1a partitioner          │
//! │  ingest/      - Loader, aggregator, runner  │
//! │  filter/      - Bloom filter & strategy     │
//! │  validator.rs - Validity query              │
//! └─────────────────────────────────────────────┘
//! ```

pub mod code;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod partition;
pub mod validator;

// Re-export commonly used types at the crate root
pub use error::{DomainError, DomainResult};
pub use filter::{FilterStats, FilterStrategy, MembershipFilter};
pub use ingest::{
    CancellationToken, IngestConfig, IngestOrchestrator, MigrationOutcome, MigrationSummary,
    SourceLocation,
};
pub use partition::Partitioner;
pub use validator::Validator;
