//! HTTP error mapping
//!
//! Wraps the engine error type so handlers can use `?` and still emit a
//! consistent JSON error body with the right status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use cq_common::Error;

/// Handler-level error; converts engine errors into HTTP responses
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            Error::InvalidCode => (StatusCode::UNAUTHORIZED, "invalid_code"),
            Error::Expired => (StatusCode::UNAUTHORIZED, "expired"),
            Error::WorldLocked(_) => (StatusCode::CONFLICT, "world_locked"),
            Error::WorldAlreadyActive(_) => (StatusCode::CONFLICT, "world_already_active"),
            Error::GenerationExhausted(_) => (StatusCode::SERVICE_UNAVAILABLE, "generation_exhausted"),
            Error::PersistenceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "persistence_unavailable")
            }
            Error::ContentLoadTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "content_load_timeout"),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                error!("Internal error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };

        // Internal details stay in the log, not in the response body
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
