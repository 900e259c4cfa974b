//! Per-key async locks for the in-memory store.
//!
//! `InMemoryKeyStore` transactions hold these in place of database row locks. `KeyLocks` hands
//! out one `tokio::sync::Mutex` per lock name; unrelated keys never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Idle locks are pruned once the registry grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock name for a single key.
    pub fn for_key(uuid: Uuid) -> String {
        format!("key:{uuid}")
    }

    /// Lock name for a normalized email address.
    pub fn for_email(email: &str) -> String {
        format!("email:{email}")
    }

    /// Wait for the named lock. Released when the guard is dropped.
    ///
    /// Not reentrant: acquiring the same name twice from one task deadlocks.
    pub async fn acquire(&self, name: String) -> OwnedMutexGuard<()> {
        let lock = {
            // The map holds no invariants a panic could break, so a poisoned lock is still usable.
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(name).or_default().clone()
        };

        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.acquire("key:a".to_string()).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("key:a".to_string()).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = KeyLocks::new();
        let _a = locks.acquire("key:a".to_string()).await;

        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("key:b".to_string())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let locks = KeyLocks::new();
        for i in 0..PRUNE_THRESHOLD {
            drop(locks.acquire(format!("key:{i}")).await);
        }
        assert_eq!(locks.len(), PRUNE_THRESHOLD);

        let _guard = locks.acquire("key:last".to_string()).await;
        assert_eq!(locks.len(), 1);
    }
}
