//! kart-api: HTTP API layer
//!
//! This crate provides the API layer including:
//! - HTTP endpoints via Axum (validation, health, readiness, metrics)
//! - Request tracing middleware
//! - Logging and Prometheus metrics setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  kart-api                   │
//! ├─────────────────────────────────────────────┤
//! │  http/          - HTTP endpoints            │
//! │  middleware/    - Request tracing           │
//! │  observability/ - Logging & metrics         │
//! └─────────────────────────────────────────────┘
//! ```

pub mod http;
pub mod middleware;
pub mod observability;
