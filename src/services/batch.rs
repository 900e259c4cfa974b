//! Batch flush of queued links.
//!
//! # Guarantees
//!
//! - Entries are dispatched in insertion order, each flagged `queued = true`
//! - Handed-off entries are removed in the same store transaction that locked the key
//! - Flushes of the same key are serialized, so no entry is dispatched twice
//! - Links queued while a flush runs stay for the next flush
//!
//! Flush is fail-stop: the first failed hand-off ends the batch. That entry and all later ones
//! stay queued in order and the error is returned.
//!
//! If the removal itself fails after a hand-off, the entry ids are remembered and the next
//! flush removes them without dispatching them again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use super::delivery::TaskDispatcher;
use super::{ServiceError, require_present};
use crate::db::{KeyStore, KeyTransaction, LockScope, StoreError};
use crate::models::api_key::ApiKey;
use crate::models::link::{DeliveryTask, KeyRef};

#[derive(Debug)]
pub struct BatchFlusher {
    store: Arc<dyn KeyStore>,
    dispatcher: Arc<dyn TaskDispatcher>,

    /// Entries already handed off whose removal did not commit
    handed_off: Mutex<HashSet<Uuid>>,
}

impl BatchFlusher {
    pub fn new(store: Arc<dyn KeyStore>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            handed_off: Mutex::new(HashSet::new()),
        }
    }

    /// Dispatch and remove every pending link of an active key.
    ///
    /// Returns the number of links removed from the queue.
    ///
    /// # Errors
    ///
    /// - `Validation`: identifier missing
    /// - `Auth`: unknown or inactive key
    /// - `Dispatch`: a hand-off failed; earlier entries are already flushed
    /// - `Store`: the queue could not be updated; handed-off entries will not be sent again
    pub async fn flush(&self, identifier: Option<&str>) -> Result<usize, ServiceError> {
        let identifier = require_present(identifier)?;
        let uuid = Uuid::parse_str(identifier).map_err(|_| ServiceError::Auth)?;

        let mut tx = self.store.begin(&[LockScope::Key(uuid)]).await?;
        let key = tx
            .find_by_uuid(uuid)
            .await?
            .filter(ApiKey::is_active)
            .ok_or(ServiceError::Auth)?;
        let pending = tx.pending_links(uuid).await?;

        let owner = KeyRef {
            uuid: key.uuid,
            email: key.email.clone(),
        };
        let skip = self.handed_off_snapshot();

        let mut removed = Vec::with_capacity(pending.len());
        let mut failure = None;
        for entry in &pending {
            if !skip.contains(&entry.id) {
                let task = DeliveryTask::from_queued(owner.clone(), entry);
                if let Err(e) = self.dispatcher.dispatch(task) {
                    tracing::error!(
                        api_key = %key.uuid,
                        flushed = removed.len(),
                        remaining = pending.len() - removed.len(),
                        "Flush stopped: {}",
                        e
                    );
                    failure = Some(e);
                    break;
                }
            }
            removed.push(entry.id);
        }

        if let Err(e) = remove_and_commit(tx, uuid, &removed).await {
            tracing::error!(api_key = %key.uuid, "Flushed links could not be removed: {}", e);
            self.mark_handed_off(&removed);
            return Err(e.into());
        }
        self.clear_handed_off(&removed);

        if let Some(e) = failure {
            return Err(e.into());
        }

        tracing::info!(api_key = %key.uuid, flushed = removed.len(), "Pending links flushed");
        Ok(removed.len())
    }

    fn handed_off_snapshot(&self) -> HashSet<Uuid> {
        self.handed_off
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mark_handed_off(&self, ids: &[Uuid]) {
        self.handed_off
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids.iter().copied());
    }

    fn clear_handed_off(&self, ids: &[Uuid]) {
        let mut handed_off = self.handed_off.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            handed_off.remove(id);
        }
    }
}

async fn remove_and_commit(
    mut tx: Box<dyn KeyTransaction>,
    uuid: Uuid,
    link_ids: &[Uuid],
) -> Result<(), StoreError> {
    if !link_ids.is_empty() {
        tx.remove_pending(uuid, link_ids).await?;
    }
    tx.commit().await
}
