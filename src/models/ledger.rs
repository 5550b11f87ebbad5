use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Ledger transaction kinds. Charges are negative amounts, credits positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    CallCharge,
    SmsCharge,
    PhoneNumberCharge,
    Refund,
    Adjustment,
    Bonus,
    Penalty,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::CallCharge => "call_charge",
            TransactionType::SmsCharge => "sms_charge",
            TransactionType::PhoneNumberCharge => "phone_number_charge",
            TransactionType::Refund => "refund",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Bonus => "bonus",
            TransactionType::Penalty => "penalty",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub tenant_id: Uuid,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub reference_id: Option<String>,
}

impl NewCreditTransaction {
    pub fn new(
        tenant_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            amount,
            transaction_type,
            description: description.into(),
            reference_id: None,
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.amount == 0 {
            return Err(AppError::Validation(
                "Transaction amount must be non-zero".to_string(),
            ));
        }
        if let Some(reference) = &self.reference_id {
            if reference.trim().is_empty() {
                return Err(AppError::Validation(
                    "Reference id must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn into_transaction(self, created_at: DateTime<Utc>) -> CreditTransaction {
        CreditTransaction {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            amount: self.amount,
            transaction_type: self.transaction_type,
            description: self.description,
            reference_id: self.reference_id,
            created_at,
        }
    }
}

/// Whether a debit may take the balance below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancePolicy {
    RequireSufficient,
    /// Settlement of already-started usage or an administrative override
    AllowOverdraft,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        transaction: CreditTransaction,
        balance_after: i64,
    },
    /// The reference was already recorded; nothing was written
    Duplicate {
        transaction: CreditTransaction,
        balance: i64,
    },
}

impl ApplyOutcome {
    pub fn transaction(&self) -> &CreditTransaction {
        match self {
            ApplyOutcome::Applied { transaction, .. } => transaction,
            ApplyOutcome::Duplicate { transaction, .. } => transaction,
        }
    }

    pub fn balance(&self) -> i64 {
        match self {
            ApplyOutcome::Applied { balance_after, .. } => *balance_after,
            ApplyOutcome::Duplicate { balance, .. } => *balance,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ApplyOutcome::Duplicate { .. })
    }
}

/// Shared balance rule for every store adapter.
pub fn check_balance(
    amount: i64,
    current_balance: i64,
    policy: BalancePolicy,
) -> Result<(), AppError> {
    if amount >= 0 || policy == BalancePolicy::AllowOverdraft {
        return Ok(());
    }
    if current_balance + amount < 0 {
        return Err(AppError::InsufficientCredits {
            required: -amount,
            available: current_balance,
        });
    }
    Ok(())
}
