//! Credit account endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use event_store::EventStore;
use trading::AccountSummary;

use super::{AppState, parse_entity_id};
use crate::error::ApiError;

/// GET /accounts/{id} — credit line and reservations of an account.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AccountSummary>, ApiError> {
    let account_id = parse_entity_id(&id)?;
    Ok(Json(state.credit.get_account(&account_id).await?))
}
