use chrono::Duration;
use std::sync::Arc;

use crate::clients::{PaymentProcessor, WebhookVerifier};
use crate::config::AppSettings;
use crate::db::repositories::Repositories;
use crate::error::AppResult;
use crate::services::{
    AutoRechargeService, BillingCycleService, CycleSettings, DebitAuthorizer, FlatRateTax,
    LedgerService, NotificationQueue, PaymentInitiator, PaymentMethodService, PaymentReconciler,
    UsageRates,
};

/// Everything the HTTP handlers and scheduled jobs need, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub repositories: Repositories,
    pub ledger: LedgerService,
    pub authorizer: DebitAuthorizer,
    pub payment_methods: PaymentMethodService,
    pub initiator: PaymentInitiator,
    pub reconciler: PaymentReconciler,
    pub auto_recharge: AutoRechargeService,
    pub billing: BillingCycleService,
    pub notifications: NotificationQueue,
    pub webhook_verifier: WebhookVerifier,
}

impl AppState {
    pub fn build(
        settings: AppSettings,
        repositories: Repositories,
        processor: Arc<dyn PaymentProcessor>,
        notifications: NotificationQueue,
    ) -> AppResult<Self> {
        let billing_config = &settings.billing;

        let ledger = LedgerService::new(repositories.ledger.clone());
        let authorizer = DebitAuthorizer::new(repositories.ledger.clone(), UsageRates::from(billing_config));
        let payment_methods =
            PaymentMethodService::new(repositories.payment_methods.clone(), processor.clone());
        let initiator = PaymentInitiator::new(
            repositories.payments.clone(),
            repositories.packages.clone(),
            payment_methods.clone(),
            processor,
            Arc::new(FlatRateTax::new(billing_config.tax_rate.clone())?),
        );
        let billing = BillingCycleService::new(
            repositories.subscriptions.clone(),
            notifications.clone(),
            CycleSettings::from(billing_config),
        );
        let reconciler = PaymentReconciler::new(
            repositories.payments.clone(),
            repositories.review_queue.clone(),
            repositories.webhook_events.clone(),
            payment_methods.clone(),
            billing.clone(),
            billing_config.currency.clone(),
        );
        let auto_recharge = AutoRechargeService::new(
            repositories.auto_recharge.clone(),
            repositories.ledger.clone(),
            repositories.packages.clone(),
            initiator.clone(),
            payment_methods.clone(),
            notifications.clone(),
            Duration::minutes(billing_config.auto_recharge_cooldown_minutes),
        );
        let webhook_verifier = WebhookVerifier::new(
            settings.stripe.webhook_secret.clone(),
            settings.stripe.webhook_tolerance_secs,
        );

        Ok(Self {
            settings: Arc::new(settings),
            repositories,
            ledger,
            authorizer,
            payment_methods,
            initiator,
            reconciler,
            auto_recharge,
            billing,
            notifications,
            webhook_verifier,
        })
    }
}
