use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

/// Minutes after which a `processing` claim is considered abandoned
pub const PROCESSING_LOCK_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookClaim {
    /// This caller owns processing of the event
    Claimed,
    AlreadyCompleted,
    /// Another worker holds a fresh claim
    InProgress,
}

/// Processor event log keyed by event id
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// New and previously failed events are claimed; completed ones are not.
    async fn claim(&self, event_id: &str, event_type: &str) -> AppResult<WebhookClaim>;

    async fn mark_completed(&self, event_id: &str) -> AppResult<()>;

    async fn mark_failed(&self, event_id: &str, error: &str) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct PgWebhookEventRepository {
    pool: PgPool,
}

impl PgWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepository for PgWebhookEventRepository {
    async fn claim(&self, event_id: &str, event_type: &str) -> AppResult<WebhookClaim> {
        let claimed = sqlx::query_scalar::<_, String>(
            "INSERT INTO webhook_events (event_id, event_type, status, attempts, created_at, updated_at)
             VALUES ($1, $2, 'processing', 1, NOW(), NOW())
             ON CONFLICT (event_id) DO UPDATE SET
                status = 'processing',
                attempts = webhook_events.attempts + 1,
                updated_at = NOW()
             WHERE webhook_events.status = 'failed'
                OR (webhook_events.status = 'processing'
                    AND webhook_events.updated_at < NOW() - make_interval(mins => $3))
             RETURNING event_id",
        )
        .bind(event_id)
        .bind(event_type)
        .bind(PROCESSING_LOCK_MINUTES as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to claim webhook event: {}", e)))?;

        if claimed.is_some() {
            return Ok(WebhookClaim::Claimed);
        }

        let status = sqlx::query_scalar::<_, String>(
            "SELECT status::TEXT FROM webhook_events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to read webhook event status: {}", e)))?;

        Ok(if status == "completed" {
            WebhookClaim::AlreadyCompleted
        } else {
            WebhookClaim::InProgress
        })
    }

    async fn mark_completed(&self, event_id: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET status = 'completed', last_error = NULL, updated_at = NOW()
             WHERE event_id = $1",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark webhook completed: {}", e)))?;
        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET status = 'failed', last_error = $2, updated_at = NOW()
             WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark webhook failed: {}", e)))?;
        Ok(())
    }
}
