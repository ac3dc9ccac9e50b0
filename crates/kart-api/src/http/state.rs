//! Application state for HTTP handlers.

use std::sync::Arc;

use kart_domain::Validator;

/// Application state shared across all HTTP handlers.
///
/// The validator is built once at startup and never mutated, so handlers
/// share it without locking.
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<Validator>,
}

impl AppState {
    pub fn new(validator: Arc<Validator>) -> Self {
        Self { validator }
    }
}
