//! Link delivery: task hand-off and the worker pool that performs it.
//!
//! The request path only ever calls `TaskDispatcher::dispatch`, which queues a task and returns.
//! Workers pull tasks from a bounded channel, run the configured `LinkDeliverer` and append the
//! outcome to the key's delivery log.
//!
//! # Delivery Flow
//!
//! 1. `DispatchEngine` or `BatchFlusher` builds a `DeliveryTask`
//! 2. `ChannelDispatcher::dispatch` pushes it onto the channel (never waits)
//! 3. A worker delivers it (HTTP POST with HMAC signature, or log only)
//! 4. The worker records a `DeliveryRecord` in the store

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::KeyStore;
use crate::models::link::{DeliveryPayload, DeliveryRecord, DeliveryTask};

type HmacSha256 = Hmac<Sha256>;

/// Receipt for a task accepted by a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: Uuid,
}

/// The task could not be handed off. Delivery outcomes are never reported here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("delivery queue is full")]
    QueueFull,

    #[error("delivery workers are not running")]
    Closed,
}

/// Fire-and-forget task submission.
pub trait TaskDispatcher: Send + Sync + std::fmt::Debug {
    /// Hand off a task without waiting for it to run.
    fn dispatch(&self, task: DeliveryTask) -> Result<TaskHandle, DispatchError>;
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub response_status: Option<i32>,
    pub error: Option<String>,
}

/// What a worker does with a task.
#[async_trait]
pub trait LinkDeliverer: Send + Sync + std::fmt::Debug {
    async fn deliver(&self, task: &DeliveryTask) -> DeliveryOutcome;
}

/// Dispatcher backed by a bounded tokio channel and a fixed worker pool.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::Sender<DeliveryTask>,
}

/// Join handles of the spawned workers.
///
/// Workers exit once every `ChannelDispatcher` clone is dropped and the channel is drained.
#[derive(Debug)]
pub struct DeliveryWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl DeliveryWorkers {
    /// Wait for all workers to finish the remaining tasks.
    pub async fn join(self) {
        for handle in self.handles {
            match handle.await {
                Err(e) if e.is_panic() => tracing::error!("Delivery worker panicked: {:?}", e),
                _ => {}
            }
        }
    }
}

impl ChannelDispatcher {
    /// Spawn `workers` delivery tasks reading from a channel of `capacity` slots.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        deliverer: Arc<dyn LinkDeliverer>,
        store: Arc<dyn KeyStore>,
        workers: usize,
        capacity: usize,
    ) -> (Self, DeliveryWorkers) {
        let (sender, receiver) = mpsc::channel::<DeliveryTask>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let deliverer = deliverer.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    run_worker(worker, receiver, deliverer, store).await;
                })
            })
            .collect();

        (Self { sender }, DeliveryWorkers { handles })
    }
}

impl TaskDispatcher for ChannelDispatcher {
    fn dispatch(&self, task: DeliveryTask) -> Result<TaskHandle, DispatchError> {
        let handle = TaskHandle {
            task_id: task.task_id,
        };

        match self.sender.try_send(task) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(task)) => {
                tracing::warn!(task_id = %task.task_id, "Delivery queue full, task rejected");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<DeliveryTask>>>,
    deliverer: Arc<dyn LinkDeliverer>,
    store: Arc<dyn KeyStore>,
) {
    loop {
        // Hold the receiver only while waiting, not while delivering.
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            tracing::debug!(worker, "Delivery channel closed, worker exiting");
            break;
        };

        let outcome = deliverer.deliver(&task).await;
        if let Some(ref error) = outcome.error {
            tracing::error!(task_id = %task.task_id, api_key = %task.api_key.uuid, "Link delivery failed: {}", error);
        }

        let record = DeliveryRecord::for_task(&task, outcome.response_status, outcome.error);
        if let Err(e) = store.record_delivery(task.api_key.uuid, &record).await {
            tracing::error!(task_id = %task.task_id, "Failed to record delivery: {}", e);
        }
    }
}

/// Invalid delivery endpoint configuration.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryConfigError {
    #[error("Invalid delivery URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Forwards each link to an HTTP endpoint with an HMAC-signed JSON body.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Delivery-Signature: sha256=<hex>`
/// - `X-Delivery-Event-Id: <task uuid>`
///
/// # Timeout
///
/// 5 seconds per request.
#[derive(Debug, Clone)]
pub struct HttpDeliverer {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl HttpDeliverer {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Result<Self, DeliveryConfigError> {
        let url = url.into();
        validate_delivery_url(&url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url,
            secret: secret.into(),
        })
    }
}

#[async_trait]
impl LinkDeliverer for HttpDeliverer {
    async fn deliver(&self, task: &DeliveryTask) -> DeliveryOutcome {
        let payload = DeliveryPayload::from(task);
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryOutcome {
                    response_status: None,
                    error: Some(format!("Failed to serialize payload: {}", e)),
                };
            }
        };

        let signature = match generate_signature(&self.secret, &body) {
            Ok(signature) => signature,
            Err(e) => {
                return DeliveryOutcome {
                    response_status: None,
                    error: Some(e),
                };
            }
        };

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Delivery-Signature", &signature)
            .header("X-Delivery-Event-Id", task.task_id.to_string())
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => DeliveryOutcome {
                response_status: Some(resp.status().as_u16() as i32),
                error: None,
            },
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                DeliveryOutcome {
                    response_status: Some(status),
                    error: Some(format!("Endpoint answered {}: {}", status, body)),
                }
            }
            Err(e) => DeliveryOutcome {
                response_status: None,
                error: Some(format!("Request failed: {}", e)),
            },
        }
    }
}

/// Deliverer used when no endpoint is configured: the link is only logged.
#[derive(Debug, Default, Clone)]
pub struct LogDeliverer;

#[async_trait]
impl LinkDeliverer for LogDeliverer {
    async fn deliver(&self, task: &DeliveryTask) -> DeliveryOutcome {
        tracing::info!(
            task_id = %task.task_id,
            api_key = %task.api_key.uuid,
            queued = task.queued,
            preview = task.preview,
            "Link delivered: {}",
            task.link
        );
        DeliveryOutcome::default()
    }
}

/// Dispatcher that keeps every accepted task in memory instead of delivering it.
///
/// Used by tests to observe hand-offs. `fail_after(n)` makes every dispatch after the first
/// `n` accepted tasks fail with `DispatchError::Closed`.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    tasks: Mutex<Vec<DeliveryTask>>,
    fail_after: Mutex<Option<usize>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_after(&self, accepted: Option<usize>) {
        *self.fail_after.lock().unwrap_or_else(PoisonError::into_inner) = accepted;
    }

    /// Tasks accepted so far, in dispatch order.
    pub fn tasks(&self) -> Vec<DeliveryTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskDispatcher for RecordingDispatcher {
    fn dispatch(&self, task: DeliveryTask) -> Result<TaskHandle, DispatchError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let limit = *self.fail_after.lock().unwrap_or_else(PoisonError::into_inner);
        if limit.is_some_and(|limit| tasks.len() >= limit) {
            return Err(DispatchError::Closed);
        }

        let handle = TaskHandle {
            task_id: task.task_id,
        };
        tasks.push(task);
        Ok(handle)
    }
}

/// Generate the `sha256=<hex>` HMAC-SHA256 signature of a payload.
fn generate_signature(secret: &str, payload: &str) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("Invalid signing key: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Validate the delivery endpoint.
///
/// # Rules
///
/// - Must be a valid URL, at most 2048 characters
/// - Must be HTTPS (HTTP is allowed for localhost)
fn validate_delivery_url(url: &str) -> Result<(), DeliveryConfigError> {
    if url.len() > 2048 {
        return Err(DeliveryConfigError::InvalidUrl(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| DeliveryConfigError::InvalidUrl("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => match parsed.host_str() {
            Some("localhost") | Some("127.0.0.1") | Some("0.0.0.0") => Ok(()),
            _ => Err(DeliveryConfigError::InvalidUrl(
                "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
            )),
        },
        _ => Err(DeliveryConfigError::InvalidUrl(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}
