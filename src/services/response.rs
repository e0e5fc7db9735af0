//! HTTP response building helpers
//!
//! Every handler answers with JSON; errors use `{ "error": ..., "retryable": ... }`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::error::LedgerError;

/// Seconds a client should wait before retrying a retryable failure
pub const RETRY_AFTER_SECS: u64 = 1;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": message }))
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

/// Status code for a ledger error
pub fn error_status(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::Validation(_) | LedgerError::Json(_) => StatusCode::BAD_REQUEST,
        LedgerError::UnknownAction(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientBalance { .. } | LedgerError::ConcurrencyConflict(_) => {
            StatusCode::CONFLICT
        }
        LedgerError::StorageTimeout(_) | LedgerError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a LedgerError to an appropriate HTTP response
pub fn error_response(error: LedgerError) -> Response<Full<Bytes>> {
    let status = error_status(&error);
    if status.is_server_error() {
        warn!(error = %error, "Request failed");
    }

    let body = match &error {
        LedgerError::InsufficientBalance { balance, requested } => serde_json::json!({
            "error": error.to_string(),
            "balance": balance,
            "requested": requested,
            "retryable": false,
        }),
        _ => serde_json::json!({
            "error": error.to_string(),
            "retryable": error.is_retryable(),
        }),
    };

    let mut response = json_response(status, &body);
    if status == StatusCode::SERVICE_UNAVAILABLE {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(error_status(&LedgerError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(&LedgerError::UnknownAction("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            error_status(&LedgerError::InsufficientBalance { balance: 5, requested: 10 }),
            StatusCode::CONFLICT
        );
        assert_eq!(error_status(&LedgerError::Database("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_timeout_carries_retry_after() {
        let response = error_response(LedgerError::StorageTimeout("slow".into()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
    }
}
