//! Business logic services.
//!
//! Services contain the key lifecycle and link dispatch logic, separated from HTTP handlers.
//! They validate input, serialize per-key updates and hand delivery work to the workers.

pub mod batch;
pub mod delivery;
pub mod dispatch;
pub mod key_lifecycle;
pub mod notifier;
pub mod registration;

use uuid::Uuid;

use crate::db::{KeyStore, StoreError};
use crate::models::api_key::ApiKey;
use delivery::DispatchError;

/// Errors returned by the services.
///
/// HTTP handlers translate these into `AppError`; the mapping of `Validation` depends on the
/// endpoint (422 for registration, 401 for link submission).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Required input is missing or malformed. Checked before any store access.
    #[error("Missing data")]
    Validation,

    /// Unknown identifier or key that is not active. Both give the same signal.
    #[error("Invalid API key")]
    Auth,

    /// Confirmation code or identifier not matched by a lifecycle operation.
    #[error("Not found")]
    NotFound,

    /// The delivery task could not be handed off.
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Return the trimmed value, or `Validation` when absent or blank.
pub(crate) fn require_present(value: Option<&str>) -> Result<&str, ServiceError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ServiceError::Validation),
    }
}

/// Resolve an identifier to an `Active` key.
///
/// Malformed, unknown and inactive identifiers all fail with `Auth`.
pub(crate) async fn authorize(
    store: &dyn KeyStore,
    identifier: &str,
) -> Result<ApiKey, ServiceError> {
    let uuid = Uuid::parse_str(identifier).map_err(|_| ServiceError::Auth)?;

    match store.find_by_uuid(uuid).await? {
        Some(key) if key.is_active() => Ok(key),
        Some(key) => {
            tracing::debug!(api_key = %key.uuid, status = %key.status, "Rejected inactive API key");
            Err(ServiceError::Auth)
        }
        None => Err(ServiceError::Auth),
    }
}
