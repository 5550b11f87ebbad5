use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{AutoRechargeSettings, AutoRechargeSettingsUpdate};

#[async_trait]
pub trait AutoRechargeRepository: Send + Sync {
    async fn get_settings(&self, tenant_id: Uuid) -> AppResult<Option<AutoRechargeSettings>>;

    async fn upsert_settings(
        &self,
        tenant_id: Uuid,
        update: &AutoRechargeSettingsUpdate,
    ) -> AppResult<AutoRechargeSettings>;

    async fn list_enabled_tenants(&self) -> AppResult<Vec<Uuid>>;

    /// Atomically stamp `last_triggered_at = now` if the tenant is enabled and
    /// outside the cooldown. Returns false when another caller got there first.
    async fn try_claim_trigger(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> AppResult<bool>;
}

const SETTINGS_COLUMNS: &str = "tenant_id, enabled, minimum_balance, recharge_amount, \
     payment_method_id, last_triggered_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgAutoRechargeRepository {
    pool: PgPool,
}

impl PgAutoRechargeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutoRechargeRepository for PgAutoRechargeRepository {
    async fn get_settings(&self, tenant_id: Uuid) -> AppResult<Option<AutoRechargeSettings>> {
        let query = format!(
            "SELECT {} FROM auto_recharge_settings WHERE tenant_id = $1",
            SETTINGS_COLUMNS
        );
        sqlx::query_as::<_, AutoRechargeSettings>(&query)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get auto-recharge settings: {}", e)))
    }

    async fn upsert_settings(
        &self,
        tenant_id: Uuid,
        update: &AutoRechargeSettingsUpdate,
    ) -> AppResult<AutoRechargeSettings> {
        let query = format!(
            "INSERT INTO auto_recharge_settings
                (tenant_id, enabled, minimum_balance, recharge_amount, payment_method_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
             ON CONFLICT (tenant_id) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                minimum_balance = EXCLUDED.minimum_balance,
                recharge_amount = EXCLUDED.recharge_amount,
                payment_method_id = EXCLUDED.payment_method_id,
                updated_at = NOW()
             RETURNING {}",
            SETTINGS_COLUMNS
        );
        sqlx::query_as::<_, AutoRechargeSettings>(&query)
            .bind(tenant_id)
            .bind(update.enabled)
            .bind(update.minimum_balance)
            .bind(update.recharge_amount)
            .bind(&update.payment_method_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to save auto-recharge settings: {}", e)))
    }

    async fn list_enabled_tenants(&self) -> AppResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT tenant_id FROM auto_recharge_settings WHERE enabled ORDER BY tenant_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list auto-recharge tenants: {}", e)))
    }

    async fn try_claim_trigger(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> AppResult<bool> {
        let claimed = sqlx::query_scalar::<_, Uuid>(
            "UPDATE auto_recharge_settings
             SET last_triggered_at = $2, updated_at = NOW()
             WHERE tenant_id = $1
               AND enabled
               AND (last_triggered_at IS NULL OR last_triggered_at < $3)
             RETURNING tenant_id",
        )
        .bind(tenant_id)
        .bind(now)
        .bind(now - cooldown)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to claim auto-recharge trigger: {}", e)))?;

        Ok(claimed.is_some())
    }
}
