use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::settings::BillingConfig;
use crate::db::repositories::CreditLedgerRepository;
use crate::error::{AppError, AppResult};
use crate::models::{ApplyOutcome, BalancePolicy, NewCreditTransaction, TransactionType, UsageKind, UsageReport};
use crate::services::ledger_service::log_outcome;
use crate::utils::financial_validation::validate_credit_amount;

/// Credits charged per billable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRates {
    pub voice_per_minute: i64,
    pub sms_per_segment: i64,
}

impl UsageRates {
    pub fn unit_cost(&self, kind: UsageKind) -> i64 {
        match kind {
            UsageKind::Voice => self.voice_per_minute,
            UsageKind::Sms => self.sms_per_segment,
        }
    }
}

impl From<&BillingConfig> for UsageRates {
    fn from(config: &BillingConfig) -> Self {
        Self {
            voice_per_minute: config.voice_credits_per_minute,
            sms_per_segment: config.sms_credits_per_segment,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub tenant_id: Uuid,
    pub kind: UsageKind,
    pub required: i64,
    pub balance: i64,
}

/// Balance gate in front of metered usage and settlement once the usage is known.
#[derive(Clone)]
pub struct DebitAuthorizer {
    ledger: Arc<dyn CreditLedgerRepository>,
    rates: UsageRates,
}

impl DebitAuthorizer {
    pub fn new(ledger: Arc<dyn CreditLedgerRepository>, rates: UsageRates) -> Self {
        Self { ledger, rates }
    }

    pub fn rates(&self) -> UsageRates {
        self.rates
    }

    /// Read-only check before a billable action starts.
    pub async fn pre_authorize(
        &self,
        tenant_id: Uuid,
        kind: UsageKind,
        estimated_cost: i64,
    ) -> AppResult<Authorization> {
        if estimated_cost < 0 {
            return Err(AppError::Validation(format!(
                "Estimated cost cannot be negative: {}",
                estimated_cost
            )));
        }

        let required = estimated_cost.max(self.rates.unit_cost(kind));
        let balance = self.ledger.balance(tenant_id).await?;
        if balance < required {
            info!(
                "Denied {:?} usage for tenant {}: balance {} below required {}",
                kind, tenant_id, balance, required
            );
            return Err(AppError::InsufficientCredits {
                required,
                available: balance,
            });
        }

        Ok(Authorization {
            tenant_id,
            kind,
            required,
            balance,
        })
    }

    /// Settle a known cost for usage that already happened. The balance may go negative.
    pub async fn post_charge(
        &self,
        tenant_id: Uuid,
        actual_cost: i64,
        reference_id: &str,
        transaction_type: TransactionType,
    ) -> AppResult<ApplyOutcome> {
        if actual_cost <= 0 {
            return Err(AppError::Validation(format!(
                "Charge amount must be positive: {}",
                actual_cost
            )));
        }
        validate_credit_amount(actual_cost, "Usage charge")?;

        let new_tx = NewCreditTransaction::new(
            tenant_id,
            -actual_cost,
            transaction_type,
            charge_description(transaction_type, actual_cost),
        )
        .with_reference(reference_id);
        new_tx.validate()?;

        let outcome = self.ledger.apply(&new_tx, BalancePolicy::AllowOverdraft).await?;
        if let ApplyOutcome::Applied { balance_after, .. } = &outcome {
            if *balance_after < 0 {
                warn!(
                    "In-flight settlement {} drove tenant {} balance negative: {}",
                    reference_id, tenant_id, balance_after
                );
            }
        }
        log_outcome(&outcome);
        Ok(outcome)
    }

    /// Bill a provider completion callback. Returns `None` for non-billable outcomes.
    pub async fn settle_usage(
        &self,
        tenant_id: Uuid,
        report: &UsageReport,
        reference_id: &str,
    ) -> AppResult<Option<ApplyOutcome>> {
        if !report.status().is_billable() {
            info!(
                "Usage {} for tenant {} ended as {:?}; nothing to bill",
                reference_id,
                tenant_id,
                report.status()
            );
            return Ok(None);
        }

        let kind = report.kind();
        let units = report.billable_units()?;
        let cost = units.checked_mul(self.rates.unit_cost(kind)).ok_or_else(|| {
            AppError::Validation(format!("Usage of {} units is out of range", units))
        })?;
        self.post_charge(tenant_id, cost, reference_id, kind.transaction_type())
            .await
            .map(Some)
    }
}

fn charge_description(transaction_type: TransactionType, cost: i64) -> String {
    match transaction_type {
        TransactionType::CallCharge => format!("Voice call: {} credits", cost),
        TransactionType::SmsCharge => format!("SMS: {} credits", cost),
        other => format!("{}: {} credits", other, cost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_store::MemoryStore;
    use crate::models::CompletionStatus;
    use crate::utils::financial_validation::MAX_CREDIT_AMOUNT;

    const RATES: UsageRates = UsageRates {
        voice_per_minute: 10,
        sms_per_segment: 5,
    };

    async fn funded(balance: i64) -> (Arc<MemoryStore>, DebitAuthorizer, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        if balance > 0 {
            let seed = NewCreditTransaction::new(tenant, balance, TransactionType::Purchase, "seed")
                .with_reference("seed");
            store.apply(&seed, BalancePolicy::RequireSufficient).await.unwrap();
        }
        (store.clone(), DebitAuthorizer::new(store, RATES), tenant)
    }

    #[tokio::test]
    async fn pre_authorize_above_balance_writes_nothing() {
        let (store, authorizer, tenant) = funded(20).await;
        let err = authorizer
            .pre_authorize(tenant, UsageKind::Voice, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredits { required: 50, available: 20 }));
        assert_eq!(store.count_transactions(tenant).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pre_authorize_requires_at_least_one_unit() {
        let (_, authorizer, tenant) = funded(4).await;
        let err = authorizer.pre_authorize(tenant, UsageKind::Sms, 0).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredits { required: 5, available: 4 }));

        let (_, authorizer, tenant) = funded(5).await;
        let auth = authorizer.pre_authorize(tenant, UsageKind::Sms, 0).await.unwrap();
        assert_eq!(auth.required, 5);
    }

    #[tokio::test]
    async fn started_call_settles_into_overdraft() {
        let (_, authorizer, tenant) = funded(15).await;
        let report = UsageReport::Voice {
            duration_seconds: 125,
            status: CompletionStatus::Completed,
        };
        let outcome = authorizer
            .settle_usage(tenant, &report, "CA100")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.transaction().amount, -30);
        assert_eq!(outcome.balance(), -15);

        // New work is denied once below one unit
        assert!(authorizer.pre_authorize(tenant, UsageKind::Voice, 0).await.is_err());
    }

    #[tokio::test]
    async fn repeated_callback_bills_once() {
        let (store, authorizer, tenant) = funded(100).await;
        let report = UsageReport::Sms {
            segments: 2,
            status: CompletionStatus::Delivered,
        };
        authorizer.settle_usage(tenant, &report, "SM9").await.unwrap();
        let second = authorizer.settle_usage(tenant, &report, "SM9").await.unwrap().unwrap();
        assert!(second.is_duplicate());
        assert_eq!(store.balance(tenant).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn extreme_usage_reports_are_rejected_without_billing() {
        let (store, authorizer, tenant) = funded(100).await;
        let voice = UsageReport::Voice {
            duration_seconds: i64::MAX,
            status: CompletionStatus::Completed,
        };
        let err = authorizer.settle_usage(tenant, &voice, "CA-long").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let sms = UsageReport::Sms {
            segments: i64::MAX / 2,
            status: CompletionStatus::Delivered,
        };
        let err = authorizer.settle_usage(tenant, &sms, "SM-huge").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Fits in an i64 but exceeds the per-charge ceiling
        let large = UsageReport::Sms {
            segments: MAX_CREDIT_AMOUNT,
            status: CompletionStatus::Delivered,
        };
        let err = authorizer.settle_usage(tenant, &large, "SM-large").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(store.balance(tenant).await.unwrap(), 100);
        assert_eq!(store.count_transactions(tenant).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unanswered_call_is_free() {
        let (store, authorizer, tenant) = funded(100).await;
        let report = UsageReport::Voice {
            duration_seconds: 0,
            status: CompletionStatus::NoAnswer,
        };
        assert!(authorizer.settle_usage(tenant, &report, "CA7").await.unwrap().is_none());
        assert_eq!(store.balance(tenant).await.unwrap(), 100);
    }
}
