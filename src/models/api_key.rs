//! API Key model for link submission.
//!
//! An API key ties a client (browser extension, bookmarklet or mobile app) to an owner email.
//! Keys from untrusted sources must be confirmed through an emailed code before they can send links.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an API key.
///
/// # State Machine
///
/// ```text
/// register (untrusted) ──> NeedsConfirmation ──confirm──> Active
/// register (trusted)   ──────────────────────────────────> Active
/// update email         ──> NeedsConfirmation
/// revoke               ──> Revoked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Waiting for the owner to exchange the confirmation code
    NeedsConfirmation,

    /// Allowed to send links
    Active,

    /// Disabled by an operator; kept for history
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::NeedsConfirmation => "needs_confirmation",
            KeyStatus::Active => "active",
            KeyStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "needs_confirmation" => Ok(KeyStatus::NeedsConfirmation),
            "active" => Ok(KeyStatus::Active),
            "revoked" => Ok(KeyStatus::Revoked),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Client application a key was registered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientSource {
    Chrome,
    Firefox,
    Bookmarklet,
    Ios,
    Android,
}

impl ClientSource {
    /// Every known source, in declaration order.
    pub const ALL: [ClientSource; 5] = [
        ClientSource::Chrome,
        ClientSource::Firefox,
        ClientSource::Bookmarklet,
        ClientSource::Ios,
        ClientSource::Android,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientSource::Chrome => "chrome",
            ClientSource::Firefox => "firefox",
            ClientSource::Bookmarklet => "bookmarklet",
            ClientSource::Ios => "ios",
            ClientSource::Android => "android",
        }
    }
}

impl fmt::Display for ClientSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientSource {
    type Err = UnknownVariant;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ClientSource::ALL
            .into_iter()
            .find(|source| source.as_str() == normalized)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// A stored string did not match any known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant `{0}`")]
pub struct UnknownVariant(pub String);

/// Represents an API key record.
///
/// # Database Table
///
/// Maps to the `api_keys` table. The pending links and the delivery log live in
/// `pending_links` and `delivery_log`, both keyed by `api_key_uuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    /// Public identifier sent by clients as `api-key`
    pub uuid: Uuid,

    /// Owner address, trimmed and lowercased
    pub email: String,

    pub source: ClientSource,

    pub status: KeyStatus,

    /// Present only while `status` is `NeedsConfirmation`
    pub confirmation_code: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Build a fresh key with a random uuid.
    pub fn new(email: impl Into<String>, source: ClientSource, status: KeyStatus) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            email: email.into(),
            source,
            status,
            confirmation_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    /// Move to `NeedsConfirmation` with the given code.
    pub fn require_confirmation(&mut self, code: String) {
        self.status = KeyStatus::NeedsConfirmation;
        self.confirmation_code = Some(code);
        self.updated_at = Utc::now();
    }

    /// Move to `Active` and drop the confirmation code.
    pub fn activate(&mut self) {
        self.status = KeyStatus::Active;
        self.confirmation_code = None;
        self.updated_at = Utc::now();
    }

    pub fn revoke(&mut self) {
        self.status = KeyStatus::Revoked;
        self.confirmation_code = None;
        self.updated_at = Utc::now();
    }
}

/// Request body for registering a key.
///
/// # JSON Example
///
/// ```json
/// {
///   "email": "jane@example.com",
///   "source": "chrome"
/// }
/// ```
///
/// `api-key` is optional. When it names an existing key whose email differs, the request
/// is treated as an email change for that key.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default, rename = "api-key")]
    pub api_key: Option<String>,
}

/// Request body for changing a key's email.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEmailRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// Query string carrying the key identifier (`?api-key=<uuid>`).
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeyQuery {
    #[serde(default, rename = "api-key")]
    pub api_key: Option<String>,
}

/// Public projection of a key returned to clients.
///
/// # JSON Example
///
/// ```json
/// {
///   "email": "jane@example.com",
///   "source": "chrome",
///   "uuid": "550e8400-e29b-41d4-a716-446655440000",
///   "status": "needs_confirmation"
/// }
/// ```
///
/// The confirmation code is never part of the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub email: String,
    pub source: ClientSource,
    pub uuid: Uuid,
    pub status: KeyStatus,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            email: key.email,
            source: key.source,
            uuid: key.uuid,
            status: key.status,
        }
    }
}
