//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use fulfillment::{ErrorKind, FulfillmentError};
use projections::ProjectionError;
use serde::Serialize;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// No caller identity on the request.
    Unauthorized(String),
    /// The caller may not do this.
    Forbidden(String),
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Fulfillment service error.
    Fulfillment(FulfillmentError),
    /// Read model error.
    Projection(ProjectionError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, Some("FORBIDDEN")),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, Some("NOT_FOUND")),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, Some("VALIDATION_FAILED")),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Projection(err) => {
                tracing::error!(error = %err, "read model failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), None)
            }
        };

        (status, Json(ErrorBody { error: message, code })).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String, Option<&'static str>) {
    let code = err.reason_code();
    match err.kind() {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, err.to_string(), code),
        ErrorKind::Rejected | ErrorKind::Conflict => (StatusCode::CONFLICT, err.to_string(), code),
        ErrorKind::CouponRejected => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string(), code),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, err.to_string(), code),
        ErrorKind::Forbidden => (StatusCode::FORBIDDEN, err.to_string(), code),
        ErrorKind::Integrity => {
            tracing::warn!(error = %err, "payment verification failed");
            (
                StatusCode::BAD_REQUEST,
                "payment verification failed".to_string(),
                None,
            )
        }
        ErrorKind::Infrastructure => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), None)
        }
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Fulfillment(err.into())
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
