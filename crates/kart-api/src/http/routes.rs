//! HTTP route definitions and handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::error;

use kart_domain::DomainError;

use super::state::AppState;
use crate::middleware::TracingLayer;
use crate::observability::{metrics_handler, MetricsState};

/// Creates the HTTP router with the validation, health and readiness endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/coupons/:code/validate", get(validate_coupon))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
        .layer(TracingLayer::new())
}

/// Creates the HTTP router with an additional `/metrics` endpoint.
pub fn create_router_with_observability(state: AppState, metrics_state: MetricsState) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_state);

    create_router(state).merge(metrics_router)
}

// ============================================================
// Error Handling
// ============================================================

/// Error codes returned in [`ApiError::code`].
pub mod error_codes {
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error (500).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        // Every error this API produces is a server-side failure.
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        // Full error is logged by the handler; the body stays generic.
        match err {
            DomainError::Storage(_) => ApiError::internal_error("coupon store lookup failed"),
            _ => ApiError::internal_error("internal error"),
        }
    }
}

// ============================================================
// Handlers
// ============================================================

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub code: String,
    pub valid: bool,
}

/// `GET /coupons/:code/validate`
async fn validate_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ValidateResponse>, ApiError> {
    match state.validator.validate(&code).await {
        Ok(valid) => Ok(Json(ValidateResponse { code, valid })),
        Err(e) => {
            error!(error = %e, "Coupon validation failed");
            Err(e.into())
        }
    }
}

/// Liveness probe.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness probe: 200 with filter stats while the store answers a ping, 503 otherwise.
///
/// Coupon counts are the ones captured when the filter was built.
/// Error details are logged, not returned.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.validator.stats();
    let counts = stats.counts;
    match state.validator.reader().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "checks": {
                    "storage": "ok"
                },
                "coupons": {
                    "valid": counts.valid,
                    "invalid": counts.invalid
                },
                "filter": {
                    "strategy": stats.strategy.as_str(),
                    "encoded_count": stats.encoded_count,
                    "num_bits": stats.num_bits,
                    "num_hashes": stats.num_hashes
                }
            })),
        ),
        Err(e) => {
            error!("Readiness check failed: storage unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "checks": {
                        "storage": "unavailable"
                    }
                })),
            )
        }
    }
}
