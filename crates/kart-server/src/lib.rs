//! kart-server: Configuration and service bootstrap
//!
//! This crate wires the storage and domain layers together:
//! - Configuration management (defaults, YAML file, `KART_` environment)
//! - Migration entry point with distribution logging
//! - Validator construction for the HTTP layer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                kart-server                  │
//! ├─────────────────────────────────────────────┤
//! │  config.rs    - Configuration management    │
//! │  bootstrap.rs - Migration & validator setup │
//! └─────────────────────────────────────────────┘
//! ```

pub mod bootstrap;
pub mod config;

// Re-exports for convenience
pub use bootstrap::{build_validator, run_migration, BootstrapError};
pub use config::{ConfigLoadError, ServerConfig};
