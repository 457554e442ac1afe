use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use crate::model::Notification;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("emitter unavailable: {0}")]
    Unavailable(String),
}

// ── NotificationEmitter ─────────────────────────────────────────────

/// Delivers a notification to the downstream notification service.
///
/// Called only by the outbox dispatcher. An `Err` leaves the entry pending
/// for a later attempt. `message_id` belongs to the outbox entry and is the
/// same on every attempt.
#[async_trait::async_trait]
pub trait NotificationEmitter: Send + Sync + 'static {
    async fn emit(&self, message_id: &str, notification: &Notification) -> Result<(), EmitError>;
}

/// POSTs the notification JSON to a fixed URL with the entry's id in the
/// `X-Message-Id` header.
pub struct HttpEmitter {
    http: reqwest::Client,
    url: String,
}

impl HttpEmitter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EmitError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl NotificationEmitter for HttpEmitter {
    async fn emit(&self, message_id: &str, notification: &Notification) -> Result<(), EmitError> {
        let resp = self
            .http
            .post(&self.url)
            .header("X-Message-Id", message_id)
            .json(notification)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EmitError::Server {
                status: status.as_u16(),
                message,
            });
        }
        debug!(message_id, target = %notification.identity_provider_id, "notification sent");
        Ok(())
    }
}

/// Logs notifications instead of sending them. Used when no notification
/// service is configured.
pub struct LogEmitter;

#[async_trait::async_trait]
impl NotificationEmitter for LogEmitter {
    async fn emit(&self, message_id: &str, notification: &Notification) -> Result<(), EmitError> {
        info!(
            message_id,
            target_user = %notification.identity_provider_id,
            kind = u8::from(notification.notification_type),
            "notification: {}",
            notification.message
        );
        Ok(())
    }
}

/// Keeps delivered notifications in memory. Can be switched into a failing
/// mode to exercise retries.
#[derive(Default)]
pub struct MemoryEmitter {
    sent: Mutex<Vec<Notification>>,
    attempts: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Message ids of every `emit` call, failed ones included.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Make every following `emit` fail with `reason`, or succeed again with `None`.
    pub fn fail_with(&self, reason: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = reason.map(String::from);
        }
    }
}

#[async_trait::async_trait]
impl NotificationEmitter for MemoryEmitter {
    async fn emit(&self, message_id: &str, notification: &Notification) -> Result<(), EmitError> {
        self.attempts
            .lock()
            .map_err(|e| EmitError::Unavailable(e.to_string()))?
            .push(message_id.to_string());
        let failure = self
            .failure
            .lock()
            .map_err(|e| EmitError::Unavailable(e.to_string()))?
            .clone();
        if let Some(reason) = failure {
            return Err(EmitError::Unavailable(reason));
        }
        self.sent
            .lock()
            .map_err(|e| EmitError::Unavailable(e.to_string()))?
            .push(notification.clone());
        Ok(())
    }
}
