use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::pool_ext::{begin, lock_tenant};
use crate::error::{AppError, AppResult};
use crate::models::ledger::check_balance;
use crate::models::{ApplyOutcome, BalancePolicy, CreditTransaction, NewCreditTransaction, TransactionType};

/// Append-only ledger with balance derivation
#[async_trait]
pub trait CreditLedgerRepository: Send + Sync {
    /// Record a transaction unless its reference was already applied.
    async fn apply(
        &self,
        transaction: &NewCreditTransaction,
        policy: BalancePolicy,
    ) -> AppResult<ApplyOutcome>;

    async fn balance(&self, tenant_id: Uuid) -> AppResult<i64>;

    /// Newest first.
    async fn transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<CreditTransaction>>;

    async fn count_transactions(&self, tenant_id: Uuid) -> AppResult<i64>;
}

const TRANSACTION_COLUMNS: &str =
    "id, tenant_id, amount, transaction_type, description, reference_id, created_at";

#[derive(Debug, Clone)]
pub struct PgCreditLedgerRepository {
    pool: PgPool,
}

impl PgCreditLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn balance_with_executor(
        &self,
        tenant_id: Uuid,
        executor: &mut Transaction<'_, Postgres>,
    ) -> AppResult<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM credit_transactions WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&mut **executor)
        .await
        .map_err(|e| AppError::Database(format!("Failed to compute balance: {}", e)))?;
        Ok(balance)
    }

    pub async fn find_by_reference_with_executor(
        &self,
        tenant_id: Uuid,
        transaction_type: TransactionType,
        reference_id: &str,
        executor: &mut Transaction<'_, Postgres>,
    ) -> AppResult<Option<CreditTransaction>> {
        let query = format!(
            "SELECT {} FROM credit_transactions
             WHERE tenant_id = $1 AND transaction_type = $2 AND reference_id = $3",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, CreditTransaction>(&query)
            .bind(tenant_id)
            .bind(transaction_type)
            .bind(reference_id)
            .fetch_optional(&mut **executor)
            .await
            .map_err(|e| AppError::Database(format!("Failed to look up transaction reference: {}", e)))
    }

    /// Check-then-insert. The caller must hold the tenant lock on `executor`.
    pub async fn apply_with_executor(
        &self,
        new_tx: &NewCreditTransaction,
        policy: BalancePolicy,
        executor: &mut Transaction<'_, Postgres>,
    ) -> AppResult<ApplyOutcome> {
        new_tx.validate()?;

        if let Some(reference) = new_tx.reference_id.as_deref() {
            if let Some(existing) = self
                .find_by_reference_with_executor(new_tx.tenant_id, new_tx.transaction_type, reference, executor)
                .await?
            {
                let balance = self.balance_with_executor(new_tx.tenant_id, executor).await?;
                return Ok(ApplyOutcome::Duplicate {
                    transaction: existing,
                    balance,
                });
            }
        }

        let balance = self.balance_with_executor(new_tx.tenant_id, executor).await?;
        check_balance(new_tx.amount, balance, policy)?;

        let query = format!(
            "INSERT INTO credit_transactions
                (id, tenant_id, amount, transaction_type, description, reference_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (tenant_id, transaction_type, reference_id)
                WHERE reference_id IS NOT NULL DO NOTHING
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let inserted = sqlx::query_as::<_, CreditTransaction>(&query)
            .bind(Uuid::new_v4())
            .bind(new_tx.tenant_id)
            .bind(new_tx.amount)
            .bind(new_tx.transaction_type)
            .bind(&new_tx.description)
            .bind(&new_tx.reference_id)
            .fetch_optional(&mut **executor)
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert credit transaction: {}", e)))?;

        match inserted {
            Some(transaction) => Ok(ApplyOutcome::Applied {
                transaction,
                balance_after: balance + new_tx.amount,
            }),
            None => {
                // Unique index fired for a writer that bypassed the tenant lock
                let reference = new_tx.reference_id.as_deref().unwrap_or_default();
                let existing = self
                    .find_by_reference_with_executor(new_tx.tenant_id, new_tx.transaction_type, reference, executor)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!("Conflicting reference {} vanished", reference))
                    })?;
                Ok(ApplyOutcome::Duplicate {
                    transaction: existing,
                    balance,
                })
            }
        }
    }
}

#[async_trait]
impl CreditLedgerRepository for PgCreditLedgerRepository {
    async fn apply(
        &self,
        transaction: &NewCreditTransaction,
        policy: BalancePolicy,
    ) -> AppResult<ApplyOutcome> {
        let mut tx = begin(&self.pool).await?;
        lock_tenant(&mut tx, transaction.tenant_id).await?;
        let outcome = self.apply_with_executor(transaction, policy, &mut tx).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit ledger transaction: {}", e)))?;
        Ok(outcome)
    }

    async fn balance(&self, tenant_id: Uuid) -> AppResult<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM credit_transactions WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to compute balance: {}", e)))?;
        Ok(balance)
    }

    async fn transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<CreditTransaction>> {
        let query = format!(
            "SELECT {} FROM credit_transactions
             WHERE tenant_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, CreditTransaction>(&query)
            .bind(tenant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list credit transactions: {}", e)))
    }

    async fn count_transactions(&self, tenant_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM credit_transactions WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to count credit transactions: {}", e)))
    }
}
