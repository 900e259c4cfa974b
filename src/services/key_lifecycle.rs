//! API key lifecycle: creation, confirmation, email changes and revocation.
//!
//! # State Machine
//!
//! - New key from a trusted source: `Active`
//! - New key from an untrusted source: `NeedsConfirmation` + confirmation code
//! - `confirm(code)`: `NeedsConfirmation` -> `Active`, code cleared
//! - Email change: any non-revoked status -> `NeedsConfirmation` + fresh code
//! - `revoke`: -> `Revoked`, code cleared
//!
//! Every read-modify-write runs in a store transaction. Anything that may create a key for an
//! email or move a key onto one locks that email first and then the key. At most one
//! non-revoked key exists per email and source.

use std::sync::Arc;

use uuid::Uuid;

use super::notifier::ConfirmationNotifier;
use super::{ServiceError, authorize, require_present};
use crate::db::{KeyStore, KeyTransaction, LockScope};
use crate::models::api_key::{ApiKey, ClientSource, KeyStatus};

#[derive(Debug)]
pub struct KeyLifecycle {
    store: Arc<dyn KeyStore>,
    notifier: Arc<dyn ConfirmationNotifier>,
}

/// A code to send once the transaction that stored it has committed.
type PendingNotice = Option<String>;

impl KeyLifecycle {
    pub fn new(store: Arc<dyn KeyStore>, notifier: Arc<dyn ConfirmationNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Create or reuse the key for `email` and `source`.
    ///
    /// # Process
    ///
    /// 1. Validate the email (before any store access)
    /// 2. If `existing` names a live key with a different email, move that key to `email`,
    ///    unless the email already has a live key for the same source: that key is returned
    ///    and `existing` is left untouched
    /// 3. Otherwise reuse the non-revoked key with the same email and source; an unconfirmed
    ///    one gets a fresh code
    /// 4. Otherwise create a key with `initial_status`
    ///
    /// An `existing` uuid that matches no key is ignored.
    pub async fn register(
        &self,
        email: &str,
        source: ClientSource,
        initial_status: KeyStatus,
        existing: Option<Uuid>,
    ) -> Result<ApiKey, ServiceError> {
        let email = normalize_email(email)?;

        let mut locks = vec![LockScope::Email(email.clone())];
        locks.extend(existing.map(LockScope::Key));
        let mut tx = self.store.begin(&locks).await?;

        let same_email = tx.find_by_email(&email).await?;
        let live_for = |source: ClientSource| {
            same_email
                .iter()
                .find(|key| key.source == source && key.status != KeyStatus::Revoked)
                .cloned()
        };

        let moving = match existing {
            Some(uuid) => tx
                .find_by_uuid(uuid)
                .await?
                .filter(|key| key.email != email && key.status != KeyStatus::Revoked),
            None => None,
        };

        let (key, notice) = match moving {
            Some(key) => match live_for(key.source) {
                Some(owner) => {
                    tracing::info!(
                        api_key = %key.uuid,
                        owner = %owner.uuid,
                        "Email already has a key for this source, returning it"
                    );
                    reuse(&mut *tx, owner).await?
                }
                None => {
                    tracing::info!(api_key = %key.uuid, "Re-registration with new email");
                    change_email(&mut *tx, key, email).await?
                }
            },
            None => match live_for(source) {
                Some(key) => reuse(&mut *tx, key).await?,
                None => create(&mut *tx, email, source, initial_status).await?,
            },
        };

        tx.commit().await?;
        self.notify(&key, notice);

        Ok(key)
    }

    /// Exchange a confirmation code for an active key.
    ///
    /// # Errors
    ///
    /// `NotFound` when no key holds this code, including codes already used.
    pub async fn confirm(&self, code: &str) -> Result<ApiKey, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::NotFound);
        }

        let found = self
            .store
            .find_by_confirmation_code(code)
            .await?
            .ok_or(ServiceError::NotFound)?;

        let mut tx = self.store.begin(&[LockScope::Key(found.uuid)]).await?;
        let mut key = tx
            .find_by_uuid(found.uuid)
            .await?
            .filter(|key| key.confirmation_code.as_deref() == Some(code))
            .ok_or(ServiceError::NotFound)?;

        key.activate();
        tx.update(&key).await?;
        tx.commit().await?;
        tracing::info!(api_key = %key.uuid, "API key confirmed");

        Ok(key)
    }

    /// Set a new email and require confirmation again.
    ///
    /// # Errors
    ///
    /// - `Validation`: malformed email (checked first), or another live key already uses the
    ///   email for the same source
    /// - `NotFound`: missing, unknown or revoked key
    pub async fn update_email(
        &self,
        identifier: Option<&str>,
        new_email: &str,
    ) -> Result<ApiKey, ServiceError> {
        let email = normalize_email(new_email)?;
        let uuid = identifier
            .and_then(|id| Uuid::parse_str(id.trim()).ok())
            .ok_or(ServiceError::NotFound)?;

        let mut tx = self
            .store
            .begin(&[LockScope::Email(email.clone()), LockScope::Key(uuid)])
            .await?;
        let key = tx
            .find_by_uuid(uuid)
            .await?
            .filter(|key| key.status != KeyStatus::Revoked)
            .ok_or(ServiceError::NotFound)?;

        let taken = tx.find_by_email(&email).await?.into_iter().any(|other| {
            other.uuid != key.uuid
                && other.source == key.source
                && other.status != KeyStatus::Revoked
        });
        if taken {
            tracing::info!(api_key = %uuid, "Email change rejected, email already in use");
            return Err(ServiceError::Validation);
        }

        let (key, notice) = change_email(&mut *tx, key, email).await?;
        tx.commit().await?;
        self.notify(&key, notice);

        Ok(key)
    }

    /// Disable a key permanently. Pending links stay stored but can no longer be flushed.
    pub async fn revoke(&self, uuid: Uuid) -> Result<ApiKey, ServiceError> {
        let mut tx = self.store.begin(&[LockScope::Key(uuid)]).await?;
        let mut key = tx
            .find_by_uuid(uuid)
            .await?
            .ok_or(ServiceError::NotFound)?;

        key.revoke();
        tx.update(&key).await?;
        tx.commit().await?;
        tracing::warn!(api_key = %uuid, "API key revoked");

        Ok(key)
    }

    /// Check that an identifier names an active key.
    pub async fn ping(&self, identifier: Option<&str>) -> Result<ApiKey, ServiceError> {
        let identifier = require_present(identifier)?;
        authorize(self.store.as_ref(), identifier).await
    }

    fn notify(&self, key: &ApiKey, notice: PendingNotice) {
        if let Some(code) = notice {
            self.notifier.send_confirmation(key, &code);
        }
    }
}

/// Return an existing key, issuing a fresh code if it is still unconfirmed.
async fn reuse(
    tx: &mut dyn KeyTransaction,
    mut key: ApiKey,
) -> Result<(ApiKey, PendingNotice), ServiceError> {
    if key.status != KeyStatus::NeedsConfirmation {
        tracing::debug!(api_key = %key.uuid, "Registration matched existing key");
        return Ok((key, None));
    }

    let code = generate_confirmation_code();
    key.require_confirmation(code.clone());
    tx.update(&key).await?;
    tracing::info!(api_key = %key.uuid, "Confirmation code reissued");

    Ok((key, Some(code)))
}

async fn create(
    tx: &mut dyn KeyTransaction,
    email: String,
    source: ClientSource,
    initial_status: KeyStatus,
) -> Result<(ApiKey, PendingNotice), ServiceError> {
    let mut key = ApiKey::new(email, source, initial_status);
    let code = match initial_status {
        KeyStatus::NeedsConfirmation => {
            let code = generate_confirmation_code();
            key.require_confirmation(code.clone());
            Some(code)
        }
        _ => None,
    };

    tx.insert(&key).await?;
    tracing::info!(api_key = %key.uuid, source = %source, status = %key.status, "API key created");

    Ok((key, code))
}

/// Caller must hold both the new email's lock and the key's lock.
async fn change_email(
    tx: &mut dyn KeyTransaction,
    mut key: ApiKey,
    email: String,
) -> Result<(ApiKey, PendingNotice), ServiceError> {
    let code = generate_confirmation_code();
    key.email = email;
    key.require_confirmation(code.clone());

    tx.update(&key).await?;
    tracing::info!(api_key = %key.uuid, "API key email changed, confirmation required");

    Ok((key, Some(code)))
}

/// Trim and lowercase an email, rejecting anything that is not `local@domain`.
pub fn normalize_email(raw: &str) -> Result<String, ServiceError> {
    let email = raw.trim().to_lowercase();

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ServiceError::Validation);
    };
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || email.chars().any(char::is_whitespace)
    {
        return Err(ServiceError::Validation);
    }

    Ok(email)
}

/// Generate a single-use confirmation code.
///
/// # Output
///
/// 64 hex characters (32 random bytes)
fn generate_confirmation_code() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}
