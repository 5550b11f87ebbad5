pub mod auto_recharge_repository;
pub mod credit_ledger_repository;
pub mod credit_package_repository;
pub mod payment_method_repository;
pub mod payment_record_repository;
pub mod reconciliation_issue_repository;
pub mod subscription_repository;
pub mod webhook_event_repository;

use sqlx::PgPool;
use std::sync::Arc;

use crate::db::memory_store::MemoryStore;

pub use auto_recharge_repository::{AutoRechargeRepository, PgAutoRechargeRepository};
pub use credit_ledger_repository::{CreditLedgerRepository, PgCreditLedgerRepository};
pub use credit_package_repository::{CreditPackageRepository, PgCreditPackageRepository};
pub use payment_method_repository::{PaymentMethodRepository, PgPaymentMethodRepository};
pub use payment_record_repository::{PaymentCompletion, PaymentRecordRepository, PgPaymentRecordRepository};
pub use reconciliation_issue_repository::{PgReconciliationIssueRepository, ReconciliationIssueRepository};
pub use subscription_repository::{
    ChargeTerms, PgSubscriptionRepository, SubscriptionChargeOutcome, SubscriptionRepository,
};
pub use webhook_event_repository::{PgWebhookEventRepository, WebhookClaim, WebhookEventRepository};

/// Every store port, backed by one adapter
#[derive(Clone)]
pub struct Repositories {
    pub ledger: Arc<dyn CreditLedgerRepository>,
    pub auto_recharge: Arc<dyn AutoRechargeRepository>,
    pub payments: Arc<dyn PaymentRecordRepository>,
    pub payment_methods: Arc<dyn PaymentMethodRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub packages: Arc<dyn CreditPackageRepository>,
    pub review_queue: Arc<dyn ReconciliationIssueRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            ledger: Arc::new(PgCreditLedgerRepository::new(pool.clone())),
            auto_recharge: Arc::new(PgAutoRechargeRepository::new(pool.clone())),
            payments: Arc::new(PgPaymentRecordRepository::new(pool.clone())),
            payment_methods: Arc::new(PgPaymentMethodRepository::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionRepository::new(pool.clone())),
            packages: Arc::new(PgCreditPackageRepository::new(pool.clone())),
            review_queue: Arc::new(PgReconciliationIssueRepository::new(pool.clone())),
            webhook_events: Arc::new(PgWebhookEventRepository::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            ledger: store.clone(),
            auto_recharge: store.clone(),
            payments: store.clone(),
            payment_methods: store.clone(),
            subscriptions: store.clone(),
            packages: store.clone(),
            review_queue: store.clone(),
            webhook_events: store,
        }
    }
}
