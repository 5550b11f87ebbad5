pub mod auto_recharge_service;
pub mod billing_cycle_service;
pub mod debit_authorizer;
pub mod ledger_service;
pub mod notification_queue;
pub mod payment_initiator;
pub mod payment_method_service;
pub mod payment_reconciler;
pub mod scheduled_jobs;

// Re-export commonly used types
pub use auto_recharge_service::{AutoRechargeService, RechargeDecision, SweepReport};
pub use billing_cycle_service::{BillingCycleService, CycleReport, CycleSettings};
pub use debit_authorizer::{DebitAuthorizer, UsageRates};
pub use ledger_service::LedgerService;
pub use notification_queue::{
    HttpNotificationDispatcher, LogNotificationDispatcher, NotificationDispatcher, NotificationQueue,
};
pub use payment_initiator::{FlatRateTax, PaymentInitiator, TaxCalculator};
pub use payment_method_service::PaymentMethodService;
pub use payment_reconciler::{PaymentReconciler, ReconcileOutcome, WebhookDisposition};
