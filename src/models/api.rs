use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ApplyOutcome, CreditTransaction, UsageKind, UsageReport};
use crate::services::auto_recharge_service::SweepReport;
use crate::services::billing_cycle_service::CycleReport;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeUsageRequest {
    pub tenant_id: Uuid,
    pub kind: UsageKind,
    #[serde(default)]
    pub estimated_cost: i64,
}

/// Provider completion callback, keyed by the provider's call or message id
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCallbackRequest {
    pub tenant_id: Uuid,
    pub reference_id: String,
    pub usage: UsageReport,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentRequest {
    pub amount: i64,
    pub reason: String,
    pub reference_id: Option<String>,
    #[serde(default)]
    pub override_balance: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub package_id: Uuid,
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachPaymentMethodRequest {
    pub payment_method_id: String,
    #[serde(default)]
    pub make_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub tenant_id: Uuid,
    pub balance: i64,
}

/// A ledger write as seen by API callers
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryResponse {
    pub transaction: CreditTransaction,
    pub balance: i64,
    pub duplicate: bool,
}

impl From<ApplyOutcome> for LedgerEntryResponse {
    fn from(outcome: ApplyOutcome) -> Self {
        let duplicate = outcome.is_duplicate();
        let balance = outcome.balance();
        let transaction = match outcome {
            ApplyOutcome::Applied { transaction, .. } | ApplyOutcome::Duplicate { transaction, .. } => {
                transaction
            }
        };
        Self {
            transaction,
            balance,
            duplicate,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSettlementResponse {
    pub billed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<LedgerEntryResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronRunResponse {
    pub billing: CycleReport,
    pub auto_recharge: SweepReport,
    pub complete: bool,
}
