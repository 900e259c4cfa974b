//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives request data (JSON or form body, query string, path params)
//! 2. Calls into the services
//! 3. Returns a JSON response or an `AppError`

use axum::{
    Form, Json,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;

/// Admin inspection endpoints
pub mod admin;
/// Service health
pub mod health;
/// Key registration, confirmation and email updates
pub mod keys;
/// Link submission and queue flushing
pub mod links;

/// Lenient client input.
///
/// JSON bodies are read when the request says `application/json`; otherwise the form body
/// (or the query string for GET) is used. Unreadable input becomes `T::default()`, so missing
/// fields surface as "Missing data" from the services instead of a framework rejection.
#[derive(Debug, Default)]
pub struct Input<T>(pub T);

impl<S, T> FromRequest<S> for Input<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = std::convert::Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let value = if is_json {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(value)| value)
                .unwrap_or_default()
        } else {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(value)| value)
                .unwrap_or_default()
        };

        Ok(Input(value))
    }
}
