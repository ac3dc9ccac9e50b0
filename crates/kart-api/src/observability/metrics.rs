//! Prometheus metrics infrastructure.
//!
//! # Metrics Exposed
//!
//! - `kart_http_requests_total` - HTTP requests by method, path, status class
//! - `kart_http_request_duration_seconds` - HTTP request duration histogram
//! - `kart_validate_requests_total` - Validation queries by outcome
//! - `kart_validate_store_lookups_total` - Filter hits resolved against the store
//! - `kart_ingest_rows_total` - Rows staged, by source
//! - `kart_ingest_partitions_total` - Partitions merged
//! - `kart_storage_query_duration_seconds` - Storage query durations
//! - `kart_storage_query_timeout_total` - Storage query timeouts

use std::sync::Arc;

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Shared state containing the Prometheus handle for metrics rendering.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    register_default_metrics();

    Ok(MetricsState::new(handle))
}

fn register_default_metrics() {
    metrics::describe_counter!("kart_http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "kart_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "kart_validate_requests_total",
        "Coupon validation queries by outcome"
    );
    metrics::describe_counter!(
        "kart_validate_store_lookups_total",
        "Membership filter hits resolved against the coupon store"
    );

    metrics::describe_counter!("kart_ingest_rows_total", "Rows written to the staging area");
    metrics::describe_counter!(
        "kart_ingest_partitions_total",
        "Staging partitions merged into the coupon table"
    );

    metrics::describe_histogram!(
        "kart_storage_query_duration_seconds",
        "Storage query duration in seconds by operation, backend, and status"
    );
    metrics::describe_counter!(
        "kart_storage_query_timeout_total",
        "Total number of storage query timeouts by operation and backend"
    );
}

/// Prometheus exposition format content type.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.render())
}

/// Records one served HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_seconds: f64) {
    let status_class = match status {
        200..=299 => "2xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status_class", status_class.to_string()),
    ];

    metrics::counter!("kart_http_requests_total", &labels).increment(1);
    metrics::histogram!("kart_http_request_duration_seconds", &labels).record(duration_seconds);
}
