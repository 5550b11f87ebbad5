use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::pool_ext::{begin, lock_tenant};
use crate::db::repositories::credit_ledger_repository::PgCreditLedgerRepository;
use crate::error::{AppError, AppResult};
use crate::models::{
    ApplyOutcome, BalancePolicy, NewCreditTransaction, NewPaymentRecord, PaymentRecord,
    PaymentStatus, TransactionType,
};

/// Result of settling a successful charge
#[derive(Debug, Clone)]
pub struct PaymentCompletion {
    pub record: PaymentRecord,
    pub ledger: ApplyOutcome,
}

#[async_trait]
pub trait PaymentRecordRepository: Send + Sync {
    /// Insert a pending record; an existing record with the same external id is returned as is.
    async fn create_pending(&self, record: &NewPaymentRecord) -> AppResult<PaymentRecord>;

    async fn find_by_external_id(&self, external_payment_id: &str) -> AppResult<Option<PaymentRecord>>;

    /// Mark the record succeeded and credit the ledger in one unit of work.
    /// Creates the record first when the webhook arrived before it.
    async fn complete_payment(&self, record: &NewPaymentRecord) -> AppResult<PaymentCompletion>;

    /// Move a pending record to failed. Succeeded records are never downgraded.
    async fn mark_failed(
        &self,
        external_payment_id: &str,
        reason: &str,
    ) -> AppResult<Option<PaymentRecord>>;

    async fn list_for_tenant(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<PaymentRecord>>;
}

/// Ledger row for a settled payment.
pub fn purchase_credit(record: &PaymentRecord) -> NewCreditTransaction {
    let description = if record.is_auto_recharge {
        format!("Auto-recharge: {} credits", record.credits_purchased)
    } else {
        format!("Purchased {} credits", record.credits_purchased)
    };
    NewCreditTransaction::new(
        record.tenant_id,
        record.credits_purchased,
        TransactionType::Purchase,
        description,
    )
    .with_reference(record.external_payment_id.clone())
}

const RECORD_COLUMNS: &str = "id, external_payment_id, tenant_id, amount, subtotal, tax_amount, \
     tax_rate, currency, credits_purchased, package_id, status, failure_reason, is_auto_recharge, \
     created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgPaymentRecordRepository {
    pool: PgPool,
    ledger: PgCreditLedgerRepository,
}

impl PgPaymentRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: PgCreditLedgerRepository::new(pool.clone()),
            pool,
        }
    }

    async fn insert_if_absent_with_executor(
        &self,
        record: &NewPaymentRecord,
        executor: &mut Transaction<'_, Postgres>,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO payment_records
                (id, external_payment_id, tenant_id, amount, subtotal, tax_amount, tax_rate, currency,
                 credits_purchased, package_id, status, is_auto_recharge, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, NOW(), NOW())
             ON CONFLICT (external_payment_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&record.external_payment_id)
        .bind(record.tenant_id)
        .bind(&record.amount)
        .bind(&record.subtotal)
        .bind(&record.tax_amount)
        .bind(&record.tax_rate)
        .bind(&record.currency)
        .bind(record.credits_purchased)
        .bind(record.package_id)
        .bind(record.is_auto_recharge)
        .execute(&mut **executor)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create payment record: {}", e)))?;
        Ok(())
    }

    async fn lock_record_with_executor(
        &self,
        external_payment_id: &str,
        executor: &mut Transaction<'_, Postgres>,
    ) -> AppResult<PaymentRecord> {
        let query = format!(
            "SELECT {} FROM payment_records WHERE external_payment_id = $1 FOR UPDATE",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(external_payment_id)
            .fetch_one(&mut **executor)
            .await
            .map_err(|e| AppError::Database(format!("Failed to lock payment record: {}", e)))
    }
}

#[async_trait]
impl PaymentRecordRepository for PgPaymentRecordRepository {
    async fn create_pending(&self, record: &NewPaymentRecord) -> AppResult<PaymentRecord> {
        let mut tx = begin(&self.pool).await?;
        self.insert_if_absent_with_executor(record, &mut tx).await?;
        let stored = self
            .lock_record_with_executor(&record.external_payment_id, &mut tx)
            .await?;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit payment record: {}", e)))?;
        Ok(stored)
    }

    async fn find_by_external_id(&self, external_payment_id: &str) -> AppResult<Option<PaymentRecord>> {
        let query = format!(
            "SELECT {} FROM payment_records WHERE external_payment_id = $1",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(external_payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get payment record: {}", e)))
    }

    async fn complete_payment(&self, record: &NewPaymentRecord) -> AppResult<PaymentCompletion> {
        let mut tx = begin(&self.pool).await?;
        lock_tenant(&mut tx, record.tenant_id).await?;

        self.insert_if_absent_with_executor(record, &mut tx).await?;
        let mut stored = self
            .lock_record_with_executor(&record.external_payment_id, &mut tx)
            .await?;

        if stored.tenant_id != record.tenant_id {
            return Err(AppError::ReconciliationInconsistency(format!(
                "Payment {} belongs to tenant {}, event names tenant {}",
                stored.external_payment_id, stored.tenant_id, record.tenant_id
            )));
        }

        if stored.status != PaymentStatus::Succeeded {
            let query = format!(
                "UPDATE payment_records
                 SET status = 'succeeded', failure_reason = NULL, updated_at = NOW()
                 WHERE id = $1
                 RETURNING {}",
                RECORD_COLUMNS
            );
            stored = sqlx::query_as::<_, PaymentRecord>(&query)
                .bind(stored.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::Database(format!("Failed to mark payment succeeded: {}", e)))?;
        }

        let ledger = self
            .ledger
            .apply_with_executor(&purchase_credit(&stored), BalancePolicy::RequireSufficient, &mut tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit payment completion: {}", e)))?;

        Ok(PaymentCompletion { record: stored, ledger })
    }

    async fn mark_failed(
        &self,
        external_payment_id: &str,
        reason: &str,
    ) -> AppResult<Option<PaymentRecord>> {
        let query = format!(
            "UPDATE payment_records
             SET status = 'failed', failure_reason = $2, updated_at = NOW()
             WHERE external_payment_id = $1 AND status = 'pending'
             RETURNING {}",
            RECORD_COLUMNS
        );
        let updated = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(external_payment_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to mark payment failed: {}", e)))?;

        match updated {
            Some(record) => Ok(Some(record)),
            None => self.find_by_external_id(external_payment_id).await,
        }
    }

    async fn list_for_tenant(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<PaymentRecord>> {
        let query = format!(
            "SELECT {} FROM payment_records WHERE tenant_id = $1 ORDER BY created_at DESC LIMIT $2",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list payment records: {}", e)))
    }
}
