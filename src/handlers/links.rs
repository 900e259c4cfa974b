//! Link HTTP handlers.
//!
//! This module implements the link endpoints:
//! - GET|POST /api/send - Send or queue a link (also POST /send, POST /chrome/send)
//! - GET /send2 - Same as send, answering with a tracking pixel for `<img>` based bookmarklets
//! - POST /api/flush?api-key=<uuid> - Dispatch every queued link
//! - POST /chrome/ping - Check that a key is usable
//!
//! Missing input on these endpoints is a 401; unknown or unconfirmed keys are a 403.

use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::IntoResponse,
};
use serde_json::{Value, json};

use super::Input;
use crate::{
    error::AppError,
    models::{
        api_key::ApiKeyQuery,
        link::{FlushResponse, SendLinkRequest},
    },
    services::dispatch::Outcome,
    state::AppState,
};

/// Transparent 1x1 GIF returned by `/send2`.
const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Send or queue a link.
///
/// # Endpoint
///
/// `GET /api/send` (query string) or `POST /api/send` (JSON or form body)
///
/// # Parameters
///
/// - `api-key` (required)
/// - `link` (required)
/// - `title` (optional)
/// - `preview`, `queued` (optional flags: `yes`, `true`, `1`, `on`)
///
/// # Response
///
/// - **Success (200 OK)**: `["Link processed"]` (delivery happens in the background)
/// - **Error (401)**: `["Missing data"]`
/// - **Error (403)**: `["Invalid API key"]`
/// - **Error (503)**: delivery queue unavailable
pub async fn send_link(
    State(state): State<AppState>,
    Input(request): Input<SendLinkRequest>,
) -> Result<Json<Value>, AppError> {
    submit(&state, &request).await?;

    Ok(Json(json!(["Link processed"])))
}

/// Send or queue a link, answering with an image.
///
/// `GET /send2`
pub async fn send_link_image(
    State(state): State<AppState>,
    Input(request): Input<SendLinkRequest>,
) -> Result<impl IntoResponse, AppError> {
    submit(&state, &request).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        PIXEL_GIF,
    ))
}

async fn submit(state: &AppState, request: &SendLinkRequest) -> Result<Outcome, AppError> {
    state
        .dispatch
        .submit(
            request.api_key.as_deref(),
            request.link.as_deref(),
            request.title.as_deref(),
            request.preview,
            request.queued,
        )
        .await
        .map_err(AppError::from_key_request)
}

/// Dispatch every queued link of a key.
///
/// # Endpoint
///
/// `POST /api/flush?api-key=<uuid>`
///
/// # Response
///
/// - **Success (200 OK)**: `{"flushed": 3}`
/// - **Error (401)**: `["Missing data"]`
/// - **Error (403)**: `["Invalid API key"]`
/// - **Error (503)**: a hand-off failed; the remaining links stay queued
pub async fn flush_queue(
    State(state): State<AppState>,
    Query(query): Query<ApiKeyQuery>,
) -> Result<Json<FlushResponse>, AppError> {
    let flushed = state
        .flusher
        .flush(query.api_key.as_deref())
        .await
        .map_err(AppError::from_key_request)?;

    Ok(Json(FlushResponse { flushed }))
}

/// Check that a key exists and is active.
///
/// `POST /chrome/ping` with `api-key` in the body
pub async fn ping(
    State(state): State<AppState>,
    Input(request): Input<ApiKeyQuery>,
) -> Result<Json<Value>, AppError> {
    state
        .lifecycle
        .ping(request.api_key.as_deref())
        .await
        .map_err(AppError::from_key_request)?;

    Ok(Json(json!(["pong"])))
}
