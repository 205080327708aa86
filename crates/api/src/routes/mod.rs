//! HTTP route handlers.

pub mod accounts;
pub mod health;
pub mod metrics;
pub mod trades;

use std::sync::Arc;

use trading::{CreditService, TradeService};

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub trades: Arc<TradeService<S>>,
    pub credit: Arc<CreditService<S>>,
    /// Name of the event store backend, reported by `/health`.
    pub backend: &'static str,
}

fn parse_entity_id(id: &str) -> Result<common::EntityId, crate::error::ApiError> {
    common::EntityId::new(id)
        .map_err(|e| crate::error::ApiError::BadRequest(format!("Invalid ID: {e}")))
}
