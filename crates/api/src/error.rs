//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use trading::TradingError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Trading operation error.
    Trading(TradingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Trading(err) => trading_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn trading_error_to_response(err: TradingError) -> (StatusCode, String) {
    let status = match &err {
        TradingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        TradingError::InvalidTransition { .. } | TradingError::AccountAlreadyOpen(_) => {
            StatusCode::CONFLICT
        }
        TradingError::Domain(domain) => match domain {
            DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
            DomainError::Deleted { .. } => StatusCode::GONE,
            DomainError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<TradingError> for ApiError {
    fn from(err: TradingError) -> Self {
        ApiError::Trading(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StreamName;
    use event_store::Version;

    fn status_of(err: TradingError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn domain_errors_map_to_http_statuses() {
        let stream = StreamName::new("trade-1");
        assert_eq!(
            status_of(DomainError::NotFound { stream: stream.clone() }.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                DomainError::ConcurrencyConflict {
                    stream,
                    expected: Version::first(),
                    actual: Version::new(2),
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        assert_eq!(
            status_of(TradingError::InvalidRequest("quantity must be positive".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
