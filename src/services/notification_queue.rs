use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LowBalance,
    SubscriptionSuspended,
    AutoRechargeFailed,
}

/// Outbound tenant notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tenant_id: Uuid,
    pub balance: i64,
    pub threshold: i64,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Delivers one notification. Errors are retried by the queue worker.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()>;
}

/// POSTs the notification as JSON to a configured endpoint
pub struct HttpNotificationDispatcher {
    client: reqwest::Client,
    url: String,
}

impl HttpNotificationDispatcher {
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build notification client: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| AppError::External(format!("Notification request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::External(format!(
                "Notification endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no endpoint is configured
pub struct LogNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LogNotificationDispatcher {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        info!(
            "Notification {:?} for tenant {}: balance {} threshold {}",
            notification.kind, notification.tenant_id, notification.balance, notification.threshold
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct NotificationStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Bounded fire-and-forget queue. Enqueueing never blocks the caller; delivery
/// failures and drops are counted instead of surfacing to ledger work.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
    stats: Arc<NotificationStats>,
}

impl NotificationQueue {
    /// Spawns the delivery worker on the current runtime.
    pub fn start(
        dispatcher: Arc<dyn NotificationDispatcher>,
        capacity: usize,
        max_attempts: u32,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(NotificationStats::default());
        let worker = tokio::spawn(run_worker(
            receiver,
            dispatcher,
            stats.clone(),
            max_attempts.max(1),
        ));
        (Self { sender, stats }, worker)
    }

    pub fn enqueue(&self, notification: Notification) -> bool {
        match self.sender.try_send(notification) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping notification: {}", e);
                false
            }
        }
    }

    pub fn stats(&self) -> NotificationStatsSnapshot {
        NotificationStatsSnapshot {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Doubling delay after the given failed attempt, capped.
fn retry_backoff_ms(attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Notification>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    stats: Arc<NotificationStats>,
    max_attempts: u32,
) {
    debug!("Notification worker started");
    while let Some(notification) = receiver.recv().await {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match dispatcher.dispatch(&notification).await {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    let backoff = retry_backoff_ms(attempt);
                    warn!(
                        "Notification for tenant {} failed (attempt {}): {}; retrying in {}ms",
                        notification.tenant_id, attempt, e, backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Notification for tenant {} failed after {} attempts: {}",
                        notification.tenant_id, attempt, e
                    );
                    break;
                }
            }
        }
    }
    debug!("Notification worker stopped");
}
