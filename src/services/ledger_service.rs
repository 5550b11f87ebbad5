use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repositories::CreditLedgerRepository;
use crate::error::{AppError, AppResult};
use crate::models::{ApplyOutcome, BalancePolicy, CreditTransaction, NewCreditTransaction, TransactionType};
use crate::utils::financial_validation::validate_credit_amount;

const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHistory {
    pub transactions: Vec<CreditTransaction>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
    pub balance: i64,
}

/// Front door to the ledger store for everything that is not metered usage.
#[derive(Clone)]
pub struct LedgerService {
    ledger: Arc<dyn CreditLedgerRepository>,
}

impl LedgerService {
    pub fn new(ledger: Arc<dyn CreditLedgerRepository>) -> Self {
        Self { ledger }
    }

    /// Idempotent on `(tenant_id, transaction_type, reference_id)`.
    pub async fn apply_transaction(
        &self,
        tenant_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
        reference_id: Option<&str>,
    ) -> AppResult<ApplyOutcome> {
        let mut new_tx = NewCreditTransaction::new(tenant_id, amount, transaction_type, description);
        if let Some(reference) = reference_id {
            new_tx = new_tx.with_reference(reference);
        }
        new_tx.validate()?;

        let outcome = self.ledger.apply(&new_tx, BalancePolicy::RequireSufficient).await?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    pub async fn get_balance(&self, tenant_id: Uuid) -> AppResult<i64> {
        self.ledger.balance(tenant_id).await
    }

    pub async fn history(&self, tenant_id: Uuid, limit: i64, offset: i64) -> AppResult<TransactionHistory> {
        if limit <= 0 || limit > MAX_PAGE_SIZE {
            return Err(AppError::InvalidArgument(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if offset < 0 {
            return Err(AppError::InvalidArgument("offset cannot be negative".to_string()));
        }

        let transactions = self.ledger.transactions(tenant_id, limit, offset).await?;
        let total_count = self.ledger.count_transactions(tenant_id).await?;
        let balance = self.ledger.balance(tenant_id).await?;

        Ok(TransactionHistory {
            transactions,
            total_count,
            limit,
            offset,
            balance,
        })
    }

    /// Administrative credit or debit. Without `override_balance` a debit may not
    /// take the balance below zero.
    pub async fn adjust_balance(
        &self,
        tenant_id: Uuid,
        amount: i64,
        reason: &str,
        reference_id: Option<&str>,
        override_balance: bool,
    ) -> AppResult<ApplyOutcome> {
        validate_credit_amount(amount, "Adjustment")?;
        if reason.trim().is_empty() {
            return Err(AppError::Validation("Adjustment reason is required".to_string()));
        }

        let mut new_tx = NewCreditTransaction::new(
            tenant_id,
            amount,
            TransactionType::Adjustment,
            format!("Admin adjustment: {}", reason.trim()),
        );
        if let Some(reference) = reference_id {
            new_tx = new_tx.with_reference(reference);
        }
        new_tx.validate()?;

        let policy = if override_balance {
            BalancePolicy::AllowOverdraft
        } else {
            BalancePolicy::RequireSufficient
        };

        let outcome = match self.ledger.apply(&new_tx, policy).await {
            Ok(outcome) => outcome,
            Err(AppError::InsufficientCredits { required, available }) => {
                return Err(AppError::Validation(format!(
                    "Adjustment would result in a negative balance. Current balance: {}, requested deduction: {}",
                    available, required
                )));
            }
            Err(e) => return Err(e),
        };

        if override_balance && outcome.balance() < 0 {
            warn!(
                "Override adjustment for tenant {} left balance at {}",
                tenant_id,
                outcome.balance()
            );
        }
        log_outcome(&outcome);
        Ok(outcome)
    }
}

pub(crate) fn log_outcome(outcome: &ApplyOutcome) {
    let tx = outcome.transaction();
    match outcome {
        ApplyOutcome::Applied { balance_after, .. } => info!(
            "Applied {} of {} credits for tenant {} (balance {})",
            tx.transaction_type, tx.amount, tx.tenant_id, balance_after
        ),
        ApplyOutcome::Duplicate { .. } => info!(
            "Suppressed duplicate {} for tenant {} (reference {})",
            tx.transaction_type,
            tx.tenant_id,
            tx.reference_id.as_deref().unwrap_or("-")
        ),
    }
}
