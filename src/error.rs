//! Error types and HTTP error response handling.
//!
//! This module defines the errors returned by HTTP handlers and how they become responses.
//! Error bodies are fixed strings so clients learn nothing about stored keys or emails.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::db::StoreError;
use crate::services::ServiceError;

/// HTTP-facing error type.
///
/// # Status Code Mapping
///
/// - `MissingData` → 422 Unprocessable Entity (registration input)
/// - `MissingCredentials` → 401 Unauthorized (link submission without key or link)
/// - `InvalidApiKey` → 403 Forbidden
/// - `NotFound` → 404 Not Found
/// - `DispatchUnavailable` → 503 Service Unavailable
/// - `AdminUnauthorized` → 401 Unauthorized with a Basic challenge
/// - `Store` → 500 Internal Server Error (hides details from client)
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing data")]
    MissingData,

    #[error("Missing data")]
    MissingCredentials,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Not found")]
    NotFound,

    #[error("Dispatch unavailable")]
    DispatchUnavailable,

    #[error("Unauthorized")]
    AdminUnauthorized,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    /// Translation for endpoints that authenticate with an API key (send, flush, ping).
    ///
    /// Missing input there is reported as 401 rather than 422.
    pub fn from_key_request(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation => AppError::MissingCredentials,
            other => other.into(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation => AppError::MissingData,
            ServiceError::Auth => AppError::InvalidApiKey,
            ServiceError::NotFound => AppError::NotFound,
            ServiceError::Dispatch(_) => AppError::DispatchUnavailable,
            ServiceError::Store(e) => AppError::Store(e),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// A JSON array holding one message:
/// ```json
/// ["Invalid API key"]
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MissingData => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MissingCredentials | AppError::AdminUnauthorized => StatusCode::UNAUTHORIZED,
            AppError::InvalidApiKey => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::DispatchUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(ref e) => {
                tracing::error!("Store failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match self {
            AppError::Store(_) => "Internal error".to_string(),
            ref other => other.to_string(),
        };
        let body = Json(json!([message]));

        if let AppError::AdminUnauthorized = self {
            return (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"jarvis\"")],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}
