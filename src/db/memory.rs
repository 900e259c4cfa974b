//! In-memory key store.
//!
//! Used by the test suite and when the server starts without `DATABASE_URL`.
//! Data is lost on restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::locks::KeyLocks;
use super::{KeyStore, KeyTransaction, LockScope, StoreError};
use crate::models::api_key::{ApiKey, KeyStatus};
use crate::models::link::{DeliveryRecord, QueuedLink};

#[derive(Debug)]
struct KeyEntry {
    key: ApiKey,
    pending: Vec<QueuedLink>,
    log: Vec<DeliveryRecord>,
}

type Tables = RwLock<HashMap<Uuid, KeyEntry>>;

/// `KeyStore` backed by a single `RwLock<HashMap>`.
///
/// Every trait method takes the lock once, so each call is atomic. Transactions serialize
/// through `KeyLocks`; their writes are visible as soon as they are made.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: Arc<Tables>,
    locks: KeyLocks,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_by_uuid(keys: &Tables, uuid: Uuid) -> Result<Option<ApiKey>, StoreError> {
    let keys = keys.read().map_err(|_| StoreError::Poisoned)?;
    Ok(keys.get(&uuid).map(|entry| entry.key.clone()))
}

fn find_by_email(keys: &Tables, email: &str) -> Result<Vec<ApiKey>, StoreError> {
    let keys = keys.read().map_err(|_| StoreError::Poisoned)?;

    let mut result: Vec<ApiKey> = keys
        .values()
        .filter(|entry| entry.key.email == email)
        .map(|entry| entry.key.clone())
        .collect();
    result.sort_by_key(|key| key.created_at);
    Ok(result)
}

fn insert(keys: &Tables, key: &ApiKey) -> Result<(), StoreError> {
    let mut keys = keys.write().map_err(|_| StoreError::Poisoned)?;

    keys.insert(
        key.uuid,
        KeyEntry {
            key: key.clone(),
            pending: Vec::new(),
            log: Vec::new(),
        },
    );
    Ok(())
}

fn update(keys: &Tables, key: &ApiKey) -> Result<(), StoreError> {
    let mut keys = keys.write().map_err(|_| StoreError::Poisoned)?;

    let entry = keys
        .get_mut(&key.uuid)
        .ok_or(StoreError::MissingKey(key.uuid))?;
    entry.key = key.clone();
    Ok(())
}

fn pending_links(keys: &Tables, uuid: Uuid) -> Result<Vec<QueuedLink>, StoreError> {
    let keys = keys.read().map_err(|_| StoreError::Poisoned)?;
    Ok(keys
        .get(&uuid)
        .map(|entry| entry.pending.clone())
        .unwrap_or_default())
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ApiKey>, StoreError> {
        find_by_uuid(&self.keys, uuid)
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<ApiKey>, StoreError> {
        find_by_email(&self.keys, email)
    }

    async fn find_by_confirmation_code(&self, code: &str) -> Result<Option<ApiKey>, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;

        Ok(keys
            .values()
            .find(|entry| entry.key.confirmation_code.as_deref() == Some(code))
            .map(|entry| entry.key.clone()))
    }

    async fn insert(&self, key: &ApiKey) -> Result<(), StoreError> {
        insert(&self.keys, key)
    }

    async fn update(&self, key: &ApiKey) -> Result<(), StoreError> {
        update(&self.keys, key)
    }

    async fn push_pending(&self, uuid: Uuid, link: &QueuedLink) -> Result<(), StoreError> {
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;

        let entry = keys.get_mut(&uuid).ok_or(StoreError::MissingKey(uuid))?;
        entry.pending.push(link.clone());
        Ok(())
    }

    async fn pending_links(&self, uuid: Uuid) -> Result<Vec<QueuedLink>, StoreError> {
        pending_links(&self.keys, uuid)
    }

    async fn record_delivery(&self, uuid: Uuid, record: &DeliveryRecord) -> Result<(), StoreError> {
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;

        let entry = keys.get_mut(&uuid).ok_or(StoreError::MissingKey(uuid))?;
        entry.log.push(record.clone());
        Ok(())
    }

    async fn delivery_log(&self, uuid: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;
        Ok(keys
            .get(&uuid)
            .map(|entry| entry.log.clone())
            .unwrap_or_default())
    }

    async fn count_by_status(&self) -> Result<Vec<(KeyStatus, i64)>, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;

        let mut counts: HashMap<KeyStatus, i64> = HashMap::new();
        for entry in keys.values() {
            *counts.entry(entry.key.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn count_pending(&self) -> Result<i64, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;
        Ok(keys.values().map(|entry| entry.pending.len() as i64).sum())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&self, locks: &[LockScope]) -> Result<Box<dyn KeyTransaction>, StoreError> {
        let mut guards = Vec::with_capacity(locks.len());
        for scope in locks {
            let name = match scope {
                LockScope::Key(uuid) => KeyLocks::for_key(*uuid),
                LockScope::Email(email) => KeyLocks::for_email(email),
            };
            guards.push(self.locks.acquire(name).await);
        }

        Ok(Box::new(MemoryTransaction {
            keys: self.keys.clone(),
            _guards: guards,
        }))
    }
}

/// Transaction over the shared tables; holds its lock guards until dropped.
struct MemoryTransaction {
    keys: Arc<Tables>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

#[async_trait]
impl KeyTransaction for MemoryTransaction {
    async fn find_by_uuid(&mut self, uuid: Uuid) -> Result<Option<ApiKey>, StoreError> {
        find_by_uuid(&self.keys, uuid)
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Vec<ApiKey>, StoreError> {
        find_by_email(&self.keys, email)
    }

    async fn insert(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        insert(&self.keys, key)
    }

    async fn update(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        update(&self.keys, key)
    }

    async fn pending_links(&mut self, uuid: Uuid) -> Result<Vec<QueuedLink>, StoreError> {
        pending_links(&self.keys, uuid)
    }

    async fn remove_pending(&mut self, uuid: Uuid, link_ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;

        let Some(entry) = keys.get_mut(&uuid) else {
            return Ok(0);
        };
        let before = entry.pending.len();
        entry.pending.retain(|link| !link_ids.contains(&link.id));
        Ok((before - entry.pending.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::api_key::ClientSource;

    fn active_key(email: &str) -> ApiKey {
        ApiKey::new(email, ClientSource::Chrome, KeyStatus::Active)
    }

    #[tokio::test]
    async fn pending_links_keep_insertion_order() {
        let store = InMemoryKeyStore::new();
        let key = active_key("a@x.com");
        store.insert(&key).await.unwrap();

        for link in ["https://a.com", "https://b.com", "https://c.com"] {
            store
                .push_pending(key.uuid, &QueuedLink::new(link, None, false))
                .await
                .unwrap();
        }

        let links: Vec<String> = store
            .pending_links(key.uuid)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.link)
            .collect();
        assert_eq!(links, ["https://a.com", "https://b.com", "https://c.com"]);
    }

    #[tokio::test]
    async fn remove_pending_counts_entries_present() {
        let store = InMemoryKeyStore::new();
        let key = active_key("a@x.com");
        store.insert(&key).await.unwrap();
        let first = QueuedLink::new("https://a.com", None, false);
        let second = QueuedLink::new("https://b.com", None, false);
        store.push_pending(key.uuid, &first).await.unwrap();
        store.push_pending(key.uuid, &second).await.unwrap();

        let mut tx = store.begin(&[LockScope::Key(key.uuid)]).await.unwrap();
        assert_eq!(tx.remove_pending(key.uuid, &[first.id]).await.unwrap(), 1);
        assert_eq!(tx.remove_pending(key.uuid, &[first.id]).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let left = store.pending_links(key.uuid).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, second.id);
    }

    #[tokio::test]
    async fn transactions_on_one_key_are_exclusive() {
        let store = Arc::new(InMemoryKeyStore::new());
        let key = active_key("a@x.com");
        let tx = store.begin(&[LockScope::Key(key.uuid)]).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let tx = store.begin(&[LockScope::Key(key.uuid)]).await.unwrap();
                tx.commit().await.unwrap();
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other scopes do not contend.
        let other = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            store.begin(&[LockScope::Email("a@x.com".to_string())]),
        )
        .await;
        assert!(other.is_ok());

        tx.commit().await.unwrap();
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn update_of_unknown_key_fails() {
        let store = InMemoryKeyStore::new();
        let key = active_key("a@x.com");

        let result = store.update(&key).await;
        assert!(matches!(result, Err(StoreError::MissingKey(uuid)) if uuid == key.uuid));
    }

    #[tokio::test]
    async fn lookups_by_email_and_code() {
        let store = InMemoryKeyStore::new();
        let mut key = active_key("a@x.com");
        key.require_confirmation("code-1".to_string());
        store.insert(&key).await.unwrap();
        store.insert(&active_key("b@x.com")).await.unwrap();

        let by_email = store.find_by_email("a@x.com").await.unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].uuid, key.uuid);

        let by_code = store.find_by_confirmation_code("code-1").await.unwrap();
        assert_eq!(by_code.map(|k| k.uuid), Some(key.uuid));
        assert!(store.find_by_confirmation_code("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counts_cover_statuses_and_pending() {
        let store = InMemoryKeyStore::new();
        let active = active_key("a@x.com");
        let mut unconfirmed = active_key("b@x.com");
        unconfirmed.require_confirmation("c".to_string());
        store.insert(&active).await.unwrap();
        store.insert(&unconfirmed).await.unwrap();
        store
            .push_pending(active.uuid, &QueuedLink::new("https://a.com", None, false))
            .await
            .unwrap();

        let mut counts = store.count_by_status().await.unwrap();
        counts.sort_by_key(|(status, _)| status.as_str());
        assert_eq!(
            counts,
            vec![(KeyStatus::Active, 1), (KeyStatus::NeedsConfirmation, 1)]
        );
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }
}
