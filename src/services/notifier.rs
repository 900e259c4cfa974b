//! Confirmation code notification.
//!
//! Mail delivery is handled outside this service; the notifier is the seam where it plugs in.

use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::models::api_key::ApiKey;

/// Receives every newly issued confirmation code.
///
/// Called after the code has been stored. Implementations must not block.
pub trait ConfirmationNotifier: Send + Sync + std::fmt::Debug {
    fn send_confirmation(&self, key: &ApiKey, code: &str);
}

/// Writes the confirmation link to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl ConfirmationNotifier for LogNotifier {
    fn send_confirmation(&self, key: &ApiKey, code: &str) {
        tracing::info!(
            api_key = %key.uuid,
            email = %key.email,
            source = %key.source,
            "Confirmation required: /api/confirm/{}",
            code
        );
    }
}

/// A notification captured by `RecordingNotifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentConfirmation {
    pub api_key: Uuid,
    pub email: String,
    pub code: String,
}

/// Keeps notifications in memory so tests can read the issued codes.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentConfirmation>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentConfirmation> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent code sent for a key.
    pub fn last_code_for(&self, api_key: Uuid) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|sent| sent.api_key == api_key)
            .map(|sent| sent.code)
    }
}

impl ConfirmationNotifier for RecordingNotifier {
    fn send_confirmation(&self, key: &ApiKey, code: &str) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentConfirmation {
                api_key: key.uuid,
                email: key.email.clone(),
                code: code.to_string(),
            });
    }
}
