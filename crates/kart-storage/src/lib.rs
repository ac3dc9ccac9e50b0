//! kart-storage: Coupon storage layer
//!
//! This crate provides the storage abstraction for the coupon service:
//! - `CouponReader` for the validation path (class counts, code scans, lookups)
//! - `IngestStore` for the ingestion pipeline (staging, bulk copy, merge)
//! - In-memory implementation for testing and local runs
//! - PostgreSQL implementation for production
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               kart-storage                  │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - reader/ingest traits, types  │
//! │  memory.rs   - In-memory implementation     │
//! │  postgres.rs - PostgreSQL implementation    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryCouponStore;
pub use postgres::{PostgresConfig, PostgresCouponStore};
pub use traits::{
    Coupon, CouponClass, CouponCounts, CouponReader, IngestStore, StagingRow,
    VALID_SOURCE_THRESHOLD,
};
