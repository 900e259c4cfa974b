//! Admin inspection handlers, mounted under `/jarvis` behind Basic auth.
//!
//! - GET /jarvis - Key counts per status and total queued links
//! - GET /jarvis/keys/{uuid} - One key with its queue and delivery log
//! - POST /jarvis/keys/{uuid}/revoke - Revoke a key

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AdminContext,
    models::{
        api_key::{ApiKeyResponse, KeyStatus},
        link::{DeliveryRecord, QueuedLink},
    },
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Keys per status; every status is listed, zero included
    pub keys: BTreeMap<&'static str, i64>,
    pub pending_links: i64,
}

/// Full view of one key. Unlike the public projection it includes timestamps.
#[derive(Debug, Serialize)]
pub struct KeyDetailResponse {
    #[serde(flatten)]
    pub key: ApiKeyResponse,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pending_links: Vec<QueuedLink>,
    pub deliveries: Vec<DeliveryRecord>,
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<StatsResponse>, AppError> {
    tracing::debug!(admin = %admin.user, "Admin stats requested");

    let mut keys: BTreeMap<&'static str, i64> = [
        KeyStatus::NeedsConfirmation,
        KeyStatus::Active,
        KeyStatus::Revoked,
    ]
    .into_iter()
    .map(|status| (status.as_str(), 0))
    .collect();
    for (status, count) in state.store.count_by_status().await? {
        keys.insert(status.as_str(), count);
    }

    Ok(Json(StatsResponse {
        keys,
        pending_links: state.store.count_pending().await?,
    }))
}

pub async fn key_detail(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<KeyDetailResponse>, AppError> {
    let uuid = parse_key_id(&uuid)?;
    let key = state
        .store
        .find_by_uuid(uuid)
        .await?
        .ok_or(AppError::NotFound)?;

    let pending_links = state.store.pending_links(uuid).await?;
    let deliveries = state.store.delivery_log(uuid).await?;

    Ok(Json(KeyDetailResponse {
        created_at: key.created_at,
        updated_at: key.updated_at,
        key: key.into(),
        pending_links,
        deliveries,
    }))
}

pub async fn revoke_key(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let uuid = parse_key_id(&uuid)?;
    tracing::info!(admin = %admin.user, api_key = %uuid, "Admin revoking key");
    let key = state.lifecycle.revoke(uuid).await?;

    Ok(Json(key.into()))
}

/// A path segment that is not a uuid names no key.
fn parse_key_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound)
}
