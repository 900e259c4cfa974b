//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::config::AdminCredentials;
use crate::db::KeyStore;
use crate::services::batch::BatchFlusher;
use crate::services::delivery::TaskDispatcher;
use crate::services::dispatch::DispatchEngine;
use crate::services::key_lifecycle::KeyLifecycle;
use crate::services::notifier::ConfirmationNotifier;
use crate::services::registration::{RegistrationService, TrustPolicy};

#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyStore>,
    pub lifecycle: Arc<KeyLifecycle>,
    pub registration: Arc<RegistrationService>,
    pub dispatch: Arc<DispatchEngine>,
    pub flusher: Arc<BatchFlusher>,

    /// `None` locks the admin routes entirely
    pub admin: Option<AdminCredentials>,
}

impl AppState {
    /// Wire the services around one store, dispatcher and notifier.
    ///
    /// Services coordinate through store transactions, so they can be built independently.
    pub fn new(
        store: Arc<dyn KeyStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        notifier: Arc<dyn ConfirmationNotifier>,
        policy: TrustPolicy,
        admin: Option<AdminCredentials>,
    ) -> Self {
        let lifecycle = Arc::new(KeyLifecycle::new(store.clone(), notifier));

        Self {
            registration: Arc::new(RegistrationService::new(lifecycle.clone(), policy)),
            dispatch: Arc::new(DispatchEngine::new(store.clone(), dispatcher.clone())),
            flusher: Arc::new(BatchFlusher::new(store.clone(), dispatcher)),
            lifecycle,
            store,
            admin,
        }
    }
}
