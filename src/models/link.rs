//! Link models: submissions, queued entries, delivery tasks and delivery records.
//!
//! # Link Flow
//!
//! 1. Client submits a link with its API key via `/api/send`
//! 2. Immediate links become a `DeliveryTask` right away
//! 3. Queued links are stored as `QueuedLink` until the key is flushed
//! 4. Workers deliver each task and append a `DeliveryRecord` to the key's log

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Link submission as sent by clients.
///
/// Accepted as a query string (`GET /api/send`) or a JSON/form body (`POST /api/send`).
///
/// # Example
///
/// ```text
/// GET /api/send?api-key=550e8400-...&link=https://example.com&title=Example&queued=yes
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SendLinkRequest {
    #[serde(default, rename = "api-key")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub link: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "deserialize_flag")]
    pub preview: bool,

    #[serde(default, deserialize_with = "deserialize_flag")]
    pub queued: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Bool(bool),
    Number(i64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

/// Parse a client flag. `yes`, `true`, `1` and `on` are true; anything else is false.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<FlagValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(FlagValue::Bool(b)) => b,
        Some(FlagValue::Number(n)) => n != 0,
        Some(FlagValue::Float(n)) => n != 0.0,
        Some(FlagValue::Text(s)) => parse_flag(&s),
        Some(FlagValue::Other(_)) | None => false,
    })
}

pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1" | "on"
    )
}

/// A link waiting in a key's queue.
///
/// # Database Table
///
/// Maps to `pending_links`. Rows are ordered by a serial `position` column,
/// which is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedLink {
    pub id: Uuid,
    pub link: String,
    pub title: Option<String>,
    pub preview: bool,
    pub queued_at: DateTime<Utc>,
}

impl QueuedLink {
    pub fn new(link: impl Into<String>, title: Option<String>, preview: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            link: link.into(),
            title,
            preview,
            queued_at: Utc::now(),
        }
    }
}

/// Owner reference carried by a delivery task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRef {
    pub uuid: Uuid,
    pub email: String,
}

/// Unit of work handed to the delivery workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryTask {
    pub task_id: Uuid,
    pub api_key: KeyRef,
    pub link: String,
    pub title: Option<String>,
    pub preview: bool,

    /// True when the link went through the pending queue before delivery
    pub queued: bool,
}

impl DeliveryTask {
    pub fn new(
        api_key: KeyRef,
        link: impl Into<String>,
        title: Option<String>,
        preview: bool,
        queued: bool,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            api_key,
            link: link.into(),
            title,
            preview,
            queued,
        }
    }

    /// Task for a link drained from the pending queue.
    pub fn from_queued(api_key: KeyRef, entry: &QueuedLink) -> Self {
        Self::new(api_key, entry.link.clone(), entry.title.clone(), entry.preview, true)
    }
}

/// One delivery attempt, appended to the key's log by a worker.
///
/// # Database Table
///
/// Maps to `delivery_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub link: String,
    pub title: Option<String>,
    pub queued: bool,
    pub delivered_at: DateTime<Utc>,

    /// HTTP status returned by the delivery endpoint, if one answered
    pub response_status: Option<i32>,

    pub error: Option<String>,
}

impl DeliveryRecord {
    pub fn for_task(task: &DeliveryTask, response_status: Option<i32>, error: Option<String>) -> Self {
        Self {
            id: task.task_id,
            link: task.link.clone(),
            title: task.title.clone(),
            queued: task.queued,
            delivered_at: Utc::now(),
            response_status,
            error,
        }
    }
}

/// Body POSTed to the configured delivery endpoint.
///
/// # Example
///
/// ```json
/// {
///   "event_id": "550e8400-e29b-41d4-a716-446655440000",
///   "api_key": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
///   "email": "jane@example.com",
///   "link": "https://example.com/article",
///   "title": "An article",
///   "preview": true,
///   "queued": false,
///   "created_at": "2025-01-15T10:30:00Z"
/// }
/// ```
///
/// # Signature Verification
///
/// The request carries `X-Delivery-Signature: sha256=<hex_encoded_hmac>`, computed as
/// HMAC-SHA256(secret, json_body).
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub event_id: Uuid,
    pub api_key: Uuid,
    pub email: String,
    pub link: String,
    pub title: Option<String>,
    pub preview: bool,
    pub queued: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&DeliveryTask> for DeliveryPayload {
    fn from(task: &DeliveryTask) -> Self {
        Self {
            event_id: task.task_id,
            api_key: task.api_key.uuid,
            email: task.api_key.email.clone(),
            link: task.link.clone(),
            title: task.title.clone(),
            preview: task.preview,
            queued: task.queued,
            created_at: Utc::now(),
        }
    }
}

/// Response body for `/api/flush`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlushResponse {
    pub flushed: usize,
}
