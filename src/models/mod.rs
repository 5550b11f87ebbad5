pub mod api;
pub mod billing;
pub mod ledger;
pub mod runtime_config;
pub mod usage;

pub use billing::{
    AutoRechargeSettings, AutoRechargeSettingsUpdate, BillingCustomer, CreditPackage,
    MeteredSubscription, NewMeteredSubscription, NewPaymentRecord, NewReconciliationIssue,
    PaymentMethod, PaymentRecord, PaymentStatus, ReconciliationIssue, SubscriptionStatus,
};
pub use ledger::{ApplyOutcome, BalancePolicy, CreditTransaction, NewCreditTransaction, TransactionType};
pub use runtime_config::AppState;
pub use usage::{CompletionStatus, UsageKind, UsageReport};
