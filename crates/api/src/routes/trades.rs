//! Trade execution endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use common::CorrelationId;
use event_store::{EventStore, Metadata};
use trading::{TradeRequest, TradeSummary};

use super::{AppState, parse_entity_id};
use crate::error::ApiError;

/// Request header carrying a caller-chosen correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// POST /trades — request a trade.
///
/// Answers `202 Accepted` with the trade as requested; the credit decision
/// completes or rejects it shortly after.
#[tracing::instrument(skip_all, fields(correlation_id = tracing::field::Empty))]
pub async fn execute<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(request): Json<TradeRequest>,
) -> Result<(StatusCode, HeaderMap, Json<TradeSummary>), ApiError> {
    let correlation_id = correlation_id(&headers)?;
    tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));

    let mut metadata = Metadata::new();
    metadata.insert(
        CorrelationId::HEADER.to_string(),
        serde_json::json!(correlation_id),
    );

    let summary = state.trades.execute_trade(request, &metadata).await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response_headers.insert(CORRELATION_HEADER, value);
    }
    Ok((StatusCode::ACCEPTED, response_headers, Json(summary)))
}

/// GET /trades/{id} — current state of a trade.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TradeSummary>, ApiError> {
    let trade_id = parse_entity_id(&id)?;
    Ok(Json(state.trades.get_trade(&trade_id).await?))
}

fn correlation_id(headers: &HeaderMap) -> Result<CorrelationId, ApiError> {
    let Some(value) = headers.get(CORRELATION_HEADER) else {
        return Ok(CorrelationId::new());
    };
    value
        .to_str()
        .ok()
        .and_then(|v| uuid::Uuid::parse_str(v.trim()).ok())
        .map(CorrelationId::from)
        .ok_or_else(|| ApiError::BadRequest(format!("{CORRELATION_HEADER} must be a UUID")))
}
