//! HTTP endpoints.
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/coupons/{code}/validate` | GET | Coupon validity |
//! | `/health` | GET | Liveness |
//! | `/ready` | GET | Readiness and filter stats |
//! | `/metrics` | GET | Prometheus metrics |

pub mod routes;
pub mod state;

pub use routes::{create_router, create_router_with_observability, ApiError};
pub use state::AppState;
