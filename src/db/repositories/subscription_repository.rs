use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::pool_ext::{begin, lock_tenant};
use crate::db::repositories::credit_ledger_repository::PgCreditLedgerRepository;
use crate::error::{AppError, AppResult};
use crate::models::{
    BalancePolicy, CreditTransaction, MeteredSubscription, NewCreditTransaction,
    NewMeteredSubscription, SubscriptionStatus, TransactionType,
};

/// Billing parameters for one charge attempt
#[derive(Debug, Clone, Copy)]
pub struct ChargeTerms {
    pub now: DateTime<Utc>,
    pub period: Duration,
    pub retry_offset: Duration,
    /// When false an underfunded subscription is left untouched
    pub suspend_on_insufficient: bool,
}

#[derive(Debug, Clone)]
pub enum SubscriptionChargeOutcome {
    Charged {
        subscription: MeteredSubscription,
        transaction: CreditTransaction,
        reactivated: bool,
    },
    Suspended {
        subscription: MeteredSubscription,
        balance: i64,
        newly_suspended: bool,
    },
    Skipped {
        reason: String,
    },
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn create(
        &self,
        tenant_id: Uuid,
        new: &NewMeteredSubscription,
        now: DateTime<Utc>,
    ) -> AppResult<MeteredSubscription>;

    async fn get(&self, id: Uuid) -> AppResult<Option<MeteredSubscription>>;

    async fn list_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>>;

    /// Active and suspended subscriptions with `next_billing_date <= now`.
    async fn list_due(&self, now: DateTime<Utc>) -> AppResult<Vec<MeteredSubscription>>;

    async fn list_suspended(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>>;

    /// Debit one period and advance, or suspend, in one unit of work.
    /// Skips when the stored billing date or status no longer matches `expected`.
    async fn charge_or_suspend(
        &self,
        expected: &MeteredSubscription,
        terms: &ChargeTerms,
    ) -> AppResult<SubscriptionChargeOutcome>;
}

/// Ledger row for one billing period.
pub fn period_charge(subscription: &MeteredSubscription) -> NewCreditTransaction {
    NewCreditTransaction::new(
        subscription.tenant_id,
        -subscription.monthly_cost,
        TransactionType::PhoneNumberCharge,
        format!("Monthly charge for {}", subscription.resource),
    )
    .with_reference(subscription.period_reference())
}

/// Next billing date after a successful charge.
pub fn advance_billing_date(subscription: &MeteredSubscription, terms: &ChargeTerms) -> DateTime<Utc> {
    match subscription.status {
        SubscriptionStatus::Active => subscription.next_billing_date + terms.period,
        SubscriptionStatus::Suspended => terms.now + terms.period,
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, resource, monthly_cost, next_billing_date, \
     status, suspended_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
    ledger: PgCreditLedgerRepository,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: PgCreditLedgerRepository::new(pool.clone()),
            pool,
        }
    }

    async fn update_schedule_with_executor(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
        next_billing_date: DateTime<Utc>,
        suspended_at: Option<DateTime<Utc>>,
        executor: &mut Transaction<'_, Postgres>,
    ) -> AppResult<MeteredSubscription> {
        let query = format!(
            "UPDATE metered_subscriptions
             SET status = $2, next_billing_date = $3, suspended_at = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, MeteredSubscription>(&query)
            .bind(id)
            .bind(status)
            .bind(next_billing_date)
            .bind(suspended_at)
            .fetch_one(&mut **executor)
            .await
            .map_err(|e| AppError::Database(format!("Failed to update subscription schedule: {}", e)))
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn create(
        &self,
        tenant_id: Uuid,
        new: &NewMeteredSubscription,
        now: DateTime<Utc>,
    ) -> AppResult<MeteredSubscription> {
        let query = format!(
            "INSERT INTO metered_subscriptions
                (id, tenant_id, resource, monthly_cost, next_billing_date, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 'active', NOW(), NOW())
             RETURNING {}",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, MeteredSubscription>(&query)
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(&new.resource)
            .bind(new.monthly_cost)
            .bind(new.first_billing_date.unwrap_or(now))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create subscription: {}", e)))
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<MeteredSubscription>> {
        let query = format!("SELECT {} FROM metered_subscriptions WHERE id = $1", SUBSCRIPTION_COLUMNS);
        sqlx::query_as::<_, MeteredSubscription>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get subscription: {}", e)))
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>> {
        let query = format!(
            "SELECT {} FROM metered_subscriptions WHERE tenant_id = $1 ORDER BY created_at",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, MeteredSubscription>(&query)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list subscriptions: {}", e)))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> AppResult<Vec<MeteredSubscription>> {
        let query = format!(
            "SELECT {} FROM metered_subscriptions
             WHERE next_billing_date <= $1
             ORDER BY tenant_id, next_billing_date",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, MeteredSubscription>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list due subscriptions: {}", e)))
    }

    async fn list_suspended(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>> {
        let query = format!(
            "SELECT {} FROM metered_subscriptions
             WHERE tenant_id = $1 AND status = 'suspended'
             ORDER BY next_billing_date",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, MeteredSubscription>(&query)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list suspended subscriptions: {}", e)))
    }

    async fn charge_or_suspend(
        &self,
        expected: &MeteredSubscription,
        terms: &ChargeTerms,
    ) -> AppResult<SubscriptionChargeOutcome> {
        let mut tx = begin(&self.pool).await?;
        lock_tenant(&mut tx, expected.tenant_id).await?;

        let query = format!(
            "SELECT {} FROM metered_subscriptions WHERE id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        );
        let current = sqlx::query_as::<_, MeteredSubscription>(&query)
            .bind(expected.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to lock subscription: {}", e)))?
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", expected.id)))?;

        if current.next_billing_date != expected.next_billing_date || current.status != expected.status {
            return Ok(SubscriptionChargeOutcome::Skipped {
                reason: "already processed for this period".to_string(),
            });
        }

        let balance = self.ledger.balance_with_executor(current.tenant_id, &mut tx).await?;

        let outcome = if balance >= current.monthly_cost {
            let ledger = self
                .ledger
                .apply_with_executor(&period_charge(&current), BalancePolicy::RequireSufficient, &mut tx)
                .await?;
            let next = advance_billing_date(&current, terms);
            let updated = self
                .update_schedule_with_executor(current.id, SubscriptionStatus::Active, next, None, &mut tx)
                .await?;
            SubscriptionChargeOutcome::Charged {
                subscription: updated,
                transaction: ledger.transaction().clone(),
                reactivated: current.status == SubscriptionStatus::Suspended,
            }
        } else if terms.suspend_on_insufficient {
            let suspended_at = current.suspended_at.unwrap_or(terms.now);
            let updated = self
                .update_schedule_with_executor(
                    current.id,
                    SubscriptionStatus::Suspended,
                    terms.now + terms.retry_offset,
                    Some(suspended_at),
                    &mut tx,
                )
                .await?;
            SubscriptionChargeOutcome::Suspended {
                subscription: updated,
                balance,
                newly_suspended: current.status == SubscriptionStatus::Active,
            }
        } else {
            SubscriptionChargeOutcome::Skipped {
                reason: format!("balance {} below monthly cost {}", balance, current.monthly_cost),
            }
        };

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit subscription charge: {}", e)))?;
        Ok(outcome)
    }
}
