use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::TransactionType;

/// Metered service families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Voice,
    Sms,
}

impl UsageKind {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            UsageKind::Voice => TransactionType::CallCharge,
            UsageKind::Sms => TransactionType::SmsCharge,
        }
    }
}

/// Final status reported by the carrier for a call or message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionStatus {
    Completed,
    Delivered,
    Sent,
    Failed,
    Busy,
    NoAnswer,
    Canceled,
    Undelivered,
}

impl CompletionStatus {
    pub fn is_billable(&self) -> bool {
        matches!(
            self,
            CompletionStatus::Completed | CompletionStatus::Delivered | CompletionStatus::Sent
        )
    }
}

/// Completion callback from a metered-service provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageReport {
    Voice {
        duration_seconds: i64,
        status: CompletionStatus,
    },
    Sms {
        segments: i64,
        status: CompletionStatus,
    },
}

impl UsageReport {
    pub fn kind(&self) -> UsageKind {
        match self {
            UsageReport::Voice { .. } => UsageKind::Voice,
            UsageReport::Sms { .. } => UsageKind::Sms,
        }
    }

    pub fn status(&self) -> CompletionStatus {
        match self {
            UsageReport::Voice { status, .. } | UsageReport::Sms { status, .. } => *status,
        }
    }

    /// Billable units: started minutes for voice, segments for SMS. Minimum one.
    pub fn billable_units(&self) -> AppResult<i64> {
        match self {
            UsageReport::Voice { duration_seconds, .. } => {
                let secs = (*duration_seconds).max(0);
                let minutes = secs.checked_add(59).map(|s| s / 60).ok_or_else(|| {
                    AppError::Validation(format!("Call duration out of range: {}s", secs))
                })?;
                Ok(minutes.max(1))
            }
            UsageReport::Sms { segments, .. } => Ok((*segments).max(1)),
        }
    }
}
