//! PostgreSQL key store.
//!
//! Statuses and sources are stored as TEXT in their wire form. Pending links are ordered by a
//! BIGSERIAL `position` column so insertion order survives concurrent appends.
//!
//! Transactions lock keys with `SELECT ... FOR UPDATE` and emails with a transaction-scoped
//! advisory lock, so every server sharing the database sees the same serialization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, Postgres, Transaction};
use uuid::Uuid;

use super::{DbPool, KeyStore, KeyTransaction, LockScope, StoreError};
use crate::models::api_key::{ApiKey, KeyStatus};
use crate::models::link::{DeliveryRecord, QueuedLink};

/// Row shape of the `api_keys` table.
#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    uuid: Uuid,
    email: String,
    source: String,
    status: String,
    confirmation_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = StoreError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            uuid: row.uuid,
            email: row.email,
            source: row
                .source
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("api_keys.source: {e}")))?,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("api_keys.status: {e}")))?,
            confirmation_code: row.confirmation_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PendingLinkRow {
    id: Uuid,
    link: String,
    title: Option<String>,
    preview: bool,
    queued_at: DateTime<Utc>,
}

impl From<PendingLinkRow> for QueuedLink {
    fn from(row: PendingLinkRow) -> Self {
        Self {
            id: row.id,
            link: row.link,
            title: row.title,
            preview: row.preview,
            queued_at: row.queued_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    id: Uuid,
    link: String,
    title: Option<String>,
    queued: bool,
    delivered_at: DateTime<Utc>,
    response_status: Option<i32>,
    error: Option<String>,
}

impl From<DeliveryRow> for DeliveryRecord {
    fn from(row: DeliveryRow) -> Self {
        Self {
            id: row.id,
            link: row.link,
            title: row.title,
            queued: row.queued,
            delivered_at: row.delivered_at,
            response_status: row.response_status,
            error: row.error,
        }
    }
}

const KEY_COLUMNS: &str =
    "uuid, email, source, status, confirmation_code, created_at, updated_at";

/// `KeyStore` backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgKeyStore {
    pool: DbPool,
}

impl PgKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn fetch_key<'e>(
    executor: impl PgExecutor<'e>,
    uuid: Uuid,
) -> Result<Option<ApiKey>, StoreError> {
    let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE uuid = $1"
    ))
    .bind(uuid)
    .fetch_optional(executor)
    .await?;

    row.map(ApiKey::try_from).transpose()
}

async fn fetch_keys_by_email<'e>(
    executor: impl PgExecutor<'e>,
    email: &str,
) -> Result<Vec<ApiKey>, StoreError> {
    let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE email = $1 ORDER BY created_at"
    ))
    .bind(email)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(ApiKey::try_from).collect()
}

async fn insert_key<'e>(executor: impl PgExecutor<'e>, key: &ApiKey) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO api_keys (uuid, email, source, status, confirmation_code, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(key.uuid)
    .bind(&key.email)
    .bind(key.source.as_str())
    .bind(key.status.as_str())
    .bind(&key.confirmation_code)
    .bind(key.created_at)
    .bind(key.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

async fn update_key<'e>(executor: impl PgExecutor<'e>, key: &ApiKey) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE api_keys
        SET email = $2,
            source = $3,
            status = $4,
            confirmation_code = $5,
            updated_at = $6
        WHERE uuid = $1
        "#,
    )
    .bind(key.uuid)
    .bind(&key.email)
    .bind(key.source.as_str())
    .bind(key.status.as_str())
    .bind(&key.confirmation_code)
    .bind(key.updated_at)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::MissingKey(key.uuid));
    }

    Ok(())
}

async fn fetch_pending<'e>(
    executor: impl PgExecutor<'e>,
    uuid: Uuid,
) -> Result<Vec<QueuedLink>, StoreError> {
    let rows = sqlx::query_as::<_, PendingLinkRow>(
        "SELECT id, link, title, preview, queued_at FROM pending_links WHERE api_key_uuid = $1 ORDER BY position",
    )
    .bind(uuid)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(QueuedLink::from).collect())
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ApiKey>, StoreError> {
        fetch_key(&self.pool, uuid).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<ApiKey>, StoreError> {
        fetch_keys_by_email(&self.pool, email).await
    }

    async fn find_by_confirmation_code(&self, code: &str) -> Result<Option<ApiKey>, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE confirmation_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApiKey::try_from).transpose()
    }

    async fn insert(&self, key: &ApiKey) -> Result<(), StoreError> {
        insert_key(&self.pool, key).await
    }

    async fn update(&self, key: &ApiKey) -> Result<(), StoreError> {
        update_key(&self.pool, key).await
    }

    async fn push_pending(&self, uuid: Uuid, link: &QueuedLink) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pending_links (id, api_key_uuid, link, title, preview, queued_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(link.id)
        .bind(uuid)
        .bind(&link.link)
        .bind(&link.title)
        .bind(link.preview)
        .bind(link.queued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending_links(&self, uuid: Uuid) -> Result<Vec<QueuedLink>, StoreError> {
        fetch_pending(&self.pool, uuid).await
    }

    async fn record_delivery(&self, uuid: Uuid, record: &DeliveryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_log (
                id,
                api_key_uuid,
                link,
                title,
                queued,
                delivered_at,
                response_status,
                error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(uuid)
        .bind(&record.link)
        .bind(&record.title)
        .bind(record.queued)
        .bind(record.delivered_at)
        .bind(record.response_status)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delivery_log(&self, uuid: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, link, title, queued, delivered_at, response_status, error
            FROM delivery_log
            WHERE api_key_uuid = $1
            ORDER BY position
            "#,
        )
        .bind(uuid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeliveryRecord::from).collect())
    }

    async fn count_by_status(&self) -> Result<Vec<(KeyStatus, i64)>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM api_keys GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(status, count)| {
                status
                    .parse::<KeyStatus>()
                    .map(|status| (status, count))
                    .map_err(|e| StoreError::Corrupt(format!("api_keys.status: {e}")))
            })
            .collect()
    }

    async fn count_pending(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_links")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self, locks: &[LockScope]) -> Result<Box<dyn KeyTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        for scope in locks {
            match scope {
                LockScope::Email(email) => {
                    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                        .bind(format!("email:{email}"))
                        .execute(&mut *tx)
                        .await?;
                }
                // Lock the row (FOR UPDATE) so no other server can modify it concurrently
                LockScope::Key(uuid) => {
                    sqlx::query("SELECT uuid FROM api_keys WHERE uuid = $1 FOR UPDATE")
                        .bind(uuid)
                        .fetch_optional(&mut *tx)
                        .await?;
                }
            }
        }

        Ok(Box::new(PgKeyTransaction { tx }))
    }
}

/// Open database transaction. Rolled back if dropped before `commit`.
struct PgKeyTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl KeyTransaction for PgKeyTransaction {
    async fn find_by_uuid(&mut self, uuid: Uuid) -> Result<Option<ApiKey>, StoreError> {
        fetch_key(&mut *self.tx, uuid).await
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Vec<ApiKey>, StoreError> {
        fetch_keys_by_email(&mut *self.tx, email).await
    }

    async fn insert(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        insert_key(&mut *self.tx, key).await
    }

    async fn update(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        update_key(&mut *self.tx, key).await
    }

    async fn pending_links(&mut self, uuid: Uuid) -> Result<Vec<QueuedLink>, StoreError> {
        fetch_pending(&mut *self.tx, uuid).await
    }

    async fn remove_pending(&mut self, uuid: Uuid, link_ids: &[Uuid]) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM pending_links WHERE api_key_uuid = $1 AND id = ANY($2)")
                .bind(uuid)
                .bind(link_ids.to_vec())
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
