//! Link submission.
//!
//! Validates a submission, authorizes the key, then either appends the link to the key's
//! pending queue or hands a delivery task to the workers. The caller never waits for delivery.

use std::sync::Arc;

use uuid::Uuid;

use super::delivery::{TaskDispatcher, TaskHandle};
use super::{ServiceError, authorize, require_present};
use crate::db::KeyStore;
use crate::models::link::{DeliveryTask, KeyRef, QueuedLink};

/// What happened to an accepted link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stored in the pending queue until the next flush
    Queued { link_id: Uuid },

    /// Handed to the delivery workers
    Dispatched(TaskHandle),
}

#[derive(Debug)]
pub struct DispatchEngine {
    store: Arc<dyn KeyStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn KeyStore>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Accept a link for an active key.
    ///
    /// # Process
    ///
    /// 1. Identifier and link must be present (`Validation`, no store access)
    /// 2. Identifier must name an active key (`Auth`)
    /// 3. Queued: append to pending links. Otherwise: dispatch with `queued = false`
    ///
    /// # Errors
    ///
    /// - `Validation`: identifier or link missing
    /// - `Auth`: unknown or inactive key
    /// - `Dispatch`: the task could not be handed off
    pub async fn submit(
        &self,
        identifier: Option<&str>,
        link: Option<&str>,
        title: Option<&str>,
        preview: bool,
        queued: bool,
    ) -> Result<Outcome, ServiceError> {
        let identifier = require_present(identifier);
        let link = require_present(link);
        let (identifier, link) = match (identifier, link) {
            (Ok(identifier), Ok(link)) => (identifier, link),
            _ => return Err(ServiceError::Validation),
        };
        let title = title.map(str::trim).filter(|t| !t.is_empty()).map(String::from);

        let key = authorize(self.store.as_ref(), identifier).await?;

        if queued {
            let entry = QueuedLink::new(link, title, preview);
            self.store.push_pending(key.uuid, &entry).await?;
            tracing::info!(api_key = %key.uuid, link_id = %entry.id, "Link queued");
            return Ok(Outcome::Queued { link_id: entry.id });
        }

        let owner = KeyRef {
            uuid: key.uuid,
            email: key.email,
        };
        let handle = self
            .dispatcher
            .dispatch(DeliveryTask::new(owner, link, title, preview, false))?;
        tracing::info!(api_key = %key.uuid, task_id = %handle.task_id, "Link dispatched");

        Ok(Outcome::Dispatched(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryKeyStore;
    use crate::models::api_key::{ApiKey, ClientSource, KeyStatus};
    use crate::services::delivery::RecordingDispatcher;

    struct Fixture {
        store: Arc<InMemoryKeyStore>,
        dispatcher: Arc<RecordingDispatcher>,
        engine: DispatchEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryKeyStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let engine = DispatchEngine::new(store.clone(), dispatcher.clone());
        Fixture {
            store,
            dispatcher,
            engine,
        }
    }

    async fn insert_key(store: &InMemoryKeyStore, status: KeyStatus) -> ApiKey {
        let key = ApiKey::new("a@x.com", ClientSource::Chrome, status);
        store.insert(&key).await.unwrap();
        key
    }

    #[tokio::test]
    async fn immediate_link_is_dispatched_once() {
        let f = fixture();
        let key = insert_key(&f.store, KeyStatus::Active).await;
        let id = key.uuid.to_string();

        let outcome = f
            .engine
            .submit(Some(&id), Some("https://a.com"), Some("A"), true, false)
            .await
            .unwrap();

        let tasks = f.dispatcher.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(outcome, Outcome::Dispatched(TaskHandle { task_id: tasks[0].task_id }));
        assert_eq!(tasks[0].api_key.uuid, key.uuid);
        assert_eq!(tasks[0].link, "https://a.com");
        assert_eq!(tasks[0].title.as_deref(), Some("A"));
        assert!(tasks[0].preview);
        assert!(!tasks[0].queued);
        assert!(f.store.pending_links(key.uuid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_link_is_stored_not_dispatched() {
        let f = fixture();
        let key = insert_key(&f.store, KeyStatus::Active).await;
        let id = key.uuid.to_string();

        let outcome = f
            .engine
            .submit(Some(&id), Some("https://a.com"), None, false, true)
            .await
            .unwrap();

        let pending = f.store.pending_links(key.uuid).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(outcome, Outcome::Queued { link_id: pending[0].id });
        assert!(f.dispatcher.tasks().is_empty());
    }

    #[tokio::test]
    async fn validation_precedes_authorization() {
        let f = fixture();

        for (identifier, link) in [
            (None, None),
            (Some("fake-key"), None),
            (None, Some("https://a.com")),
            (Some(""), Some("https://a.com")),
        ] {
            let result = f.engine.submit(identifier, link, None, false, false).await;
            assert!(matches!(result, Err(ServiceError::Validation)));
        }
    }

    #[tokio::test]
    async fn unknown_and_inactive_keys_look_the_same() {
        let f = fixture();
        let unconfirmed = insert_key(&f.store, KeyStatus::NeedsConfirmation).await;
        let revoked = insert_key(&f.store, KeyStatus::Revoked).await;

        for identifier in [
            "fake-key".to_string(),
            Uuid::new_v4().to_string(),
            unconfirmed.uuid.to_string(),
            revoked.uuid.to_string(),
        ] {
            let result = f
                .engine
                .submit(Some(&identifier), Some("https://a.com"), Some("t"), false, true)
                .await;
            assert!(matches!(result, Err(ServiceError::Auth)));
        }
        assert!(f.dispatcher.tasks().is_empty());
        assert!(f.store.pending_links(unconfirmed.uuid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hand_off_failure_is_reported() {
        let f = fixture();
        let key = insert_key(&f.store, KeyStatus::Active).await;
        f.dispatcher.fail_after(Some(0));

        let result = f
            .engine
            .submit(Some(&key.uuid.to_string()), Some("https://a.com"), None, false, false)
            .await;

        assert!(matches!(result, Err(ServiceError::Dispatch(_))));
    }

    #[tokio::test]
    async fn blank_title_is_dropped() {
        let f = fixture();
        let key = insert_key(&f.store, KeyStatus::Active).await;

        f.engine
            .submit(Some(&key.uuid.to_string()), Some("https://a.com"), Some("  "), false, false)
            .await
            .unwrap();

        assert_eq!(f.dispatcher.tasks()[0].title, None);
    }
}
