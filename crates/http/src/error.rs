//! Mapping from `ErrorEnvelope` to HTTP responses.

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use metricsd_shared::{ErrorCode, ErrorEnvelope};

/// HTTP status for an envelope.
#[must_use]
pub fn status_for(error: &ErrorEnvelope) -> StatusCode {
    let code = &error.code;
    if *code == ErrorCode::not_found() {
        StatusCode::NOT_FOUND
    } else if *code == ErrorCode::invalid_input() || *code == ErrorCode::integrity_failure() {
        StatusCode::BAD_REQUEST
    } else if *code == ErrorCode::decryption_failure() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else if *code == ErrorCode::forbidden() {
        StatusCode::FORBIDDEN
    } else if *code == ErrorCode::not_implemented() {
        StatusCode::NOT_IMPLEMENTED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Error returned by handlers and middleware: a plain-text message.
#[derive(Debug)]
pub struct ApiError(pub ErrorEnvelope);

impl From<ErrorEnvelope> for ApiError {
    fn from(error: ErrorEnvelope) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal server error".to_string()
        } else {
            self.0.message
        };
        (
            status,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_statuses() {
        let cases = [
            (ErrorCode::not_found(), StatusCode::NOT_FOUND),
            (ErrorCode::invalid_input(), StatusCode::BAD_REQUEST),
            (ErrorCode::integrity_failure(), StatusCode::BAD_REQUEST),
            (ErrorCode::decryption_failure(), StatusCode::UNPROCESSABLE_ENTITY),
            (ErrorCode::forbidden(), StatusCode::FORBIDDEN),
            (ErrorCode::unavailable(), StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorCode::not_implemented(), StatusCode::NOT_IMPLEMENTED),
        ];
        for (code, status) in cases {
            assert_eq!(status_for(&ErrorEnvelope::expected(code.clone(), "x")), status, "{code}");
        }
    }
}
