//! API key HTTP handlers.
//!
//! This module implements the key lifecycle endpoints:
//! - POST /api/register - Register (or re-register) a key
//! - POST /api/update?api-key=<uuid> - Change a key's email
//! - GET /api/confirm/{code} - Confirm an email address
//! - POST /chrome/register, POST / - Legacy registration with a fixed source

use axum::{
    Json,
    extract::{Path, Query, State},
};

use super::Input;
use crate::{
    error::AppError,
    models::api_key::{
        ApiKeyQuery, ApiKeyResponse, ClientSource, RegisterRequest, UpdateEmailRequest,
    },
    state::AppState,
};

/// Register a key.
///
/// # Endpoint
///
/// `POST /api/register`
///
/// # Request Body
///
/// ```json
/// {
///   "email": "jane@example.com",
///   "source": "chrome"
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: `{email, source, uuid, status}`
/// - **Error (422)**: `["Missing data"]` when email or source is missing or invalid
pub async fn register(
    State(state): State<AppState>,
    Input(request): Input<RegisterRequest>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let key = state
        .registration
        .register(
            request.email.as_deref(),
            request.source.as_deref(),
            request.api_key.as_deref(),
        )
        .await?;

    Ok(Json(key.into()))
}

/// Register from the Chrome extension; the source is always `chrome`.
///
/// `POST /chrome/register`
pub async fn register_chrome(
    State(state): State<AppState>,
    Input(request): Input<RegisterRequest>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    register_pinned(state, ClientSource::Chrome, request).await
}

/// Register from the bookmarklet page; the source is always `bookmarklet`.
///
/// `POST /`
pub async fn register_bookmarklet(
    State(state): State<AppState>,
    Input(request): Input<RegisterRequest>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    register_pinned(state, ClientSource::Bookmarklet, request).await
}

async fn register_pinned(
    state: AppState,
    source: ClientSource,
    request: RegisterRequest,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let key = state
        .registration
        .register_from(source, request.email.as_deref(), request.api_key.as_deref())
        .await?;

    Ok(Json(key.into()))
}

/// Change the email of a key. The key must be confirmed again afterwards.
///
/// # Endpoint
///
/// `POST /api/update?api-key=<uuid>`
///
/// # Request Body
///
/// ```json
/// { "email": "new@example.com" }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: projection with `"status": "needs_confirmation"`
/// - **Error (422)**: email missing or malformed, or already used by another key of this source
/// - **Error (404)**: key not found
pub async fn update_email(
    State(state): State<AppState>,
    Query(query): Query<ApiKeyQuery>,
    Input(request): Input<UpdateEmailRequest>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let key = state
        .lifecycle
        .update_email(
            query.api_key.as_deref(),
            request.email.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok(Json(key.into()))
}

/// Exchange a confirmation code.
///
/// # Endpoint
///
/// `GET /api/confirm/{code}` (also `GET /confirm/{code}`)
///
/// # Response
///
/// - **Success (200 OK)**: projection with `"status": "active"`
/// - **Error (404)**: unknown or already used code
pub async fn confirm(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let key = state.lifecycle.confirm(&code).await?;

    Ok(Json(key.into()))
}
