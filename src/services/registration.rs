//! Registration entry point and the source trust policy.
//!
//! Native apps are trusted and get an active key immediately; browser clients must confirm
//! their email first. The policy is a lookup table, so trusting another source is a
//! configuration change.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use super::ServiceError;
use super::key_lifecycle::KeyLifecycle;
use crate::models::api_key::{ApiKey, ClientSource, KeyStatus};

/// Initial key status per client source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPolicy {
    initial: HashMap<ClientSource, KeyStatus>,
}

impl TrustPolicy {
    /// Sources listed in `trusted` start `Active`; every other source starts
    /// `NeedsConfirmation`.
    pub fn new(trusted: &[ClientSource]) -> Self {
        let initial = ClientSource::ALL
            .into_iter()
            .map(|source| {
                let status = if trusted.contains(&source) {
                    KeyStatus::Active
                } else {
                    KeyStatus::NeedsConfirmation
                };
                (source, status)
            })
            .collect();

        Self { initial }
    }

    pub fn initial_status(&self, source: ClientSource) -> KeyStatus {
        self.initial
            .get(&source)
            .copied()
            .unwrap_or(KeyStatus::NeedsConfirmation)
    }
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self::new(&[ClientSource::Ios, ClientSource::Android])
    }
}

/// Maps raw client input onto `KeyLifecycle::register`.
#[derive(Debug)]
pub struct RegistrationService {
    lifecycle: Arc<KeyLifecycle>,
    policy: TrustPolicy,
}

impl RegistrationService {
    pub fn new(lifecycle: Arc<KeyLifecycle>, policy: TrustPolicy) -> Self {
        Self { lifecycle, policy }
    }

    /// Register from raw input.
    ///
    /// # Errors
    ///
    /// `Validation` when email or source is missing, blank or unknown. Nothing is stored.
    pub async fn register(
        &self,
        email: Option<&str>,
        source: Option<&str>,
        existing: Option<&str>,
    ) -> Result<ApiKey, ServiceError> {
        let email = super::require_present(email)?;
        let source = super::require_present(source)?
            .parse::<ClientSource>()
            .map_err(|_| ServiceError::Validation)?;

        self.register_from(source, Some(email), existing).await
    }

    /// Register with the source fixed by the entry point (e.g. the Chrome routes).
    pub async fn register_from(
        &self,
        source: ClientSource,
        email: Option<&str>,
        existing: Option<&str>,
    ) -> Result<ApiKey, ServiceError> {
        let email = super::require_present(email)?;
        let existing = existing.and_then(|id| Uuid::parse_str(id.trim()).ok());

        self.lifecycle
            .register(email, source, self.policy.initial_status(source), existing)
            .await
    }
}
