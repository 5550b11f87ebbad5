use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::pool_ext::begin;
use crate::error::{AppError, AppResult};
use crate::models::{BillingCustomer, PaymentMethod};

#[async_trait]
pub trait PaymentMethodRepository: Send + Sync {
    /// Insert or refresh a method. Setting it default clears the tenant's other defaults.
    async fn upsert(&self, method: &PaymentMethod) -> AppResult<PaymentMethod>;

    async fn list_active(&self, tenant_id: Uuid) -> AppResult<Vec<PaymentMethod>>;

    async fn get(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<Option<PaymentMethod>>;

    /// The tenant's default active method, else its most recent active one.
    async fn get_default(&self, tenant_id: Uuid) -> AppResult<Option<PaymentMethod>>;

    async fn deactivate(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<bool>;

    async fn get_customer(&self, tenant_id: Uuid) -> AppResult<Option<BillingCustomer>>;

    /// Keeps the first mapping if one already exists.
    async fn save_customer(&self, tenant_id: Uuid, customer_id: &str) -> AppResult<BillingCustomer>;
}

const METHOD_COLUMNS: &str = "id, tenant_id, customer_id, card_brand, card_last_four, \
     card_exp_month, card_exp_year, is_default, is_active, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgPaymentMethodRepository {
    pool: PgPool,
}

impl PgPaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentMethodRepository for PgPaymentMethodRepository {
    async fn upsert(&self, method: &PaymentMethod) -> AppResult<PaymentMethod> {
        let mut tx = begin(&self.pool).await?;

        if method.is_default {
            sqlx::query(
                "UPDATE payment_methods SET is_default = FALSE, updated_at = NOW()
                 WHERE tenant_id = $1 AND id <> $2 AND is_default",
            )
            .bind(method.tenant_id)
            .bind(&method.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to clear default payment method: {}", e)))?;
        }

        let query = format!(
            "INSERT INTO payment_methods
                (id, tenant_id, customer_id, card_brand, card_last_four, card_exp_month, card_exp_year,
                 is_default, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW(), NOW())
             ON CONFLICT (id) DO UPDATE SET
                card_brand = EXCLUDED.card_brand,
                card_last_four = EXCLUDED.card_last_four,
                card_exp_month = EXCLUDED.card_exp_month,
                card_exp_year = EXCLUDED.card_exp_year,
                is_default = EXCLUDED.is_default OR payment_methods.is_default,
                is_active = TRUE,
                updated_at = NOW()
             WHERE payment_methods.tenant_id = EXCLUDED.tenant_id
             RETURNING {}",
            METHOD_COLUMNS
        );
        let saved = sqlx::query_as::<_, PaymentMethod>(&query)
            .bind(&method.id)
            .bind(method.tenant_id)
            .bind(&method.customer_id)
            .bind(&method.card_brand)
            .bind(&method.card_last_four)
            .bind(method.card_exp_month)
            .bind(method.card_exp_year)
            .bind(method.is_default)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to save payment method: {}", e)))?
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Payment method {} is registered to another tenant",
                    method.id
                ))
            })?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit payment method: {}", e)))?;
        Ok(saved)
    }

    async fn list_active(&self, tenant_id: Uuid) -> AppResult<Vec<PaymentMethod>> {
        let query = format!(
            "SELECT {} FROM payment_methods
             WHERE tenant_id = $1 AND is_active
             ORDER BY is_default DESC, created_at DESC",
            METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&query)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list payment methods: {}", e)))
    }

    async fn get(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<Option<PaymentMethod>> {
        let query = format!(
            "SELECT {} FROM payment_methods WHERE tenant_id = $1 AND id = $2",
            METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&query)
            .bind(tenant_id)
            .bind(payment_method_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get payment method: {}", e)))
    }

    async fn get_default(&self, tenant_id: Uuid) -> AppResult<Option<PaymentMethod>> {
        let query = format!(
            "SELECT {} FROM payment_methods
             WHERE tenant_id = $1 AND is_active
             ORDER BY is_default DESC, created_at DESC
             LIMIT 1",
            METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&query)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get default payment method: {}", e)))
    }

    async fn deactivate(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_methods
             SET is_active = FALSE, is_default = FALSE, updated_at = NOW()
             WHERE tenant_id = $1 AND id = $2 AND is_active",
        )
        .bind(tenant_id)
        .bind(payment_method_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to deactivate payment method: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_customer(&self, tenant_id: Uuid) -> AppResult<Option<BillingCustomer>> {
        sqlx::query_as::<_, BillingCustomer>(
            "SELECT tenant_id, customer_id, created_at FROM billing_customers WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to get billing customer: {}", e)))
    }

    async fn save_customer(&self, tenant_id: Uuid, customer_id: &str) -> AppResult<BillingCustomer> {
        sqlx::query(
            "INSERT INTO billing_customers (tenant_id, customer_id, created_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (tenant_id) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to save billing customer: {}", e)))?;

        self.get_customer(tenant_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Billing customer for {} not persisted", tenant_id)))
    }
}
