//! Key storage: the `KeyStore` contract, PostgreSQL pool setup and migrations.
//!
//! This module provides:
//! - The `KeyStore` trait every service talks to
//! - `KeyTransaction`, the locked read-modify-write scope opened by `KeyStore::begin`
//! - `PgKeyStore`, the PostgreSQL implementation used in production
//! - `InMemoryKeyStore`, used by tests and when no `DATABASE_URL` is configured
//! - Pool creation and migration helpers

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::api_key::{ApiKey, KeyStatus};
use crate::models::link::{DeliveryRecord, QueuedLink};

pub mod locks;
pub mod memory;
pub mod postgres;

pub use memory::InMemoryKeyStore;
pub use postgres::PgKeyStore;

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Errors raised by a key store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row could not be mapped back to the domain model
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The key to update does not exist
    #[error("API key {0} not found")]
    MissingKey(Uuid),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Something a transaction locks exclusively until it commits or is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockScope {
    /// One key, by uuid. Locking a key that does not exist is allowed.
    Key(Uuid),

    /// A normalized email address, covering keys that may not exist yet.
    Email(String),
}

/// Persistence contract for API keys and the data they own.
///
/// Each method is atomic on its own. Read-modify-write sequences run inside a
/// `KeyTransaction` obtained from `begin`.
#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ApiKey>, StoreError>;

    /// All keys registered with this (normalized) email, oldest first.
    async fn find_by_email(&self, email: &str) -> Result<Vec<ApiKey>, StoreError>;

    async fn find_by_confirmation_code(&self, code: &str) -> Result<Option<ApiKey>, StoreError>;

    async fn insert(&self, key: &ApiKey) -> Result<(), StoreError>;

    /// Overwrite email, source, status and confirmation code of an existing key.
    ///
    /// # Errors
    ///
    /// `MissingKey` if no key has this uuid.
    async fn update(&self, key: &ApiKey) -> Result<(), StoreError>;

    /// Append a link to the end of the key's pending queue.
    async fn push_pending(&self, uuid: Uuid, link: &QueuedLink) -> Result<(), StoreError>;

    /// Snapshot of the pending queue in insertion order.
    async fn pending_links(&self, uuid: Uuid) -> Result<Vec<QueuedLink>, StoreError>;

    async fn record_delivery(&self, uuid: Uuid, record: &DeliveryRecord) -> Result<(), StoreError>;

    /// Delivery log in append order.
    async fn delivery_log(&self, uuid: Uuid) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Number of keys per status. Statuses with no keys may be omitted.
    async fn count_by_status(&self) -> Result<Vec<(KeyStatus, i64)>, StoreError>;

    /// Total pending links across all keys.
    async fn count_pending(&self) -> Result<i64, StoreError>;

    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Open a transaction holding every scope in `locks`, acquired in the given order.
    ///
    /// Callers list an email scope before any key scope. Locks are released on commit or drop.
    async fn begin(&self, locks: &[LockScope]) -> Result<Box<dyn KeyTransaction>, StoreError>;
}

/// Reads and writes made while holding the locks of `KeyStore::begin`.
///
/// Dropping a transaction without `commit` discards its writes on PostgreSQL. The in-memory
/// store applies writes immediately and has no rollback.
#[async_trait]
pub trait KeyTransaction: Send {
    async fn find_by_uuid(&mut self, uuid: Uuid) -> Result<Option<ApiKey>, StoreError>;

    async fn find_by_email(&mut self, email: &str) -> Result<Vec<ApiKey>, StoreError>;

    async fn insert(&mut self, key: &ApiKey) -> Result<(), StoreError>;

    async fn update(&mut self, key: &ApiKey) -> Result<(), StoreError>;

    async fn pending_links(&mut self, uuid: Uuid) -> Result<Vec<QueuedLink>, StoreError>;

    /// Remove the given pending entries of a key. Returns how many were present.
    async fn remove_pending(&mut self, uuid: Uuid, link_ids: &[Uuid]) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Create a new PostgreSQL connection pool.
///
/// A connection pool maintains multiple database connections that are reused across HTTP requests.
///
/// # Configuration
///
/// - Maximum connections: 5
/// - Connections are created lazily as needed
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server cannot be reached.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
