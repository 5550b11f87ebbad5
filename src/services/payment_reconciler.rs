use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repositories::{
    PaymentRecordRepository, ReconciliationIssueRepository, WebhookClaim, WebhookEventRepository,
};
use crate::error::{AppError, AppResult};
use crate::models::{ApplyOutcome, NewPaymentRecord, NewReconciliationIssue, PaymentRecord, PaymentStatus};
use crate::services::billing_cycle_service::BillingCycleService;
use crate::services::ledger_service::log_outcome;
use crate::services::payment_initiator::metadata_keys;
use crate::services::payment_method_service::PaymentMethodService;
use crate::stripe_types::{CheckoutSession, CheckoutSessionMode, Event, EventType, PaymentIntent};
use crate::utils::admin_alerting::{send_reconciliation_alert, send_stripe_webhook_failure_alert};
use crate::utils::financial_validation::validate_credit_amount;
use crate::utils::stripe_currency_utils::{
    round_for_currency, stripe_cents_to_decimal, validate_stripe_amount_matches,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Credited { record: PaymentRecord, balance: i64 },
    Duplicate { record: PaymentRecord, balance: i64 },
    MarkedFailed { record: PaymentRecord },
    /// A failure arrived for a payment that already succeeded
    AlreadySettled { record: PaymentRecord },
    Ignored { reason: String },
}

/// What happened to one webhook delivery
#[derive(Debug, Clone)]
pub enum WebhookDisposition {
    Processed(ReconcileOutcome),
    AlreadyProcessed,
    /// Another worker is processing the same event
    InProgress,
    ReviewQueued { detail: String },
}

impl WebhookDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            WebhookDisposition::Processed(_) => "processed",
            WebhookDisposition::AlreadyProcessed => "already_processed",
            WebhookDisposition::InProgress => "in_progress",
            WebhookDisposition::ReviewQueued { .. } => "review_queued",
        }
    }
}

/// A processor-confirmed charge, from either a payment intent or a checkout session
struct SucceededCharge<'a> {
    external_payment_id: &'a str,
    metadata: &'a HashMap<String, String>,
    amount_minor: i64,
    subtotal_minor: Option<i64>,
    currency: &'a str,
    customer_id: Option<&'a str>,
    payment_method_id: Option<&'a str>,
}

/// Applies processor outcomes to payment records and the ledger.
#[derive(Clone)]
pub struct PaymentReconciler {
    payments: Arc<dyn PaymentRecordRepository>,
    review_queue: Arc<dyn ReconciliationIssueRepository>,
    webhook_events: Arc<dyn WebhookEventRepository>,
    payment_methods: PaymentMethodService,
    billing: BillingCycleService,
    default_currency: String,
}

impl PaymentReconciler {
    pub fn new(
        payments: Arc<dyn PaymentRecordRepository>,
        review_queue: Arc<dyn ReconciliationIssueRepository>,
        webhook_events: Arc<dyn WebhookEventRepository>,
        payment_methods: PaymentMethodService,
        billing: BillingCycleService,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            payments,
            review_queue,
            webhook_events,
            payment_methods,
            billing,
            default_currency: default_currency.into(),
        }
    }

    /// Entry point for verified webhook events. Completed events are acknowledged
    /// without reprocessing; failed ones are picked up again on redelivery.
    pub async fn process_webhook(&self, event: &Event) -> AppResult<WebhookDisposition> {
        match self.webhook_events.claim(&event.id, &event.type_).await? {
            WebhookClaim::Claimed => {}
            WebhookClaim::AlreadyCompleted => {
                info!("Webhook event {} already processed, skipping", event.id);
                return Ok(WebhookDisposition::AlreadyProcessed);
            }
            WebhookClaim::InProgress => {
                warn!("Webhook event {} is being processed by another worker", event.id);
                return Ok(WebhookDisposition::InProgress);
            }
        }

        match self.dispatch(event).await {
            Ok(outcome) => {
                self.webhook_events.mark_completed(&event.id).await?;
                Ok(WebhookDisposition::Processed(outcome))
            }
            Err(AppError::ReconciliationInconsistency(detail)) => {
                // Owned by the review queue now; redelivery must not retry it on its own
                self.webhook_events.mark_failed(&event.id, &detail).await?;
                Ok(WebhookDisposition::ReviewQueued { detail })
            }
            Err(e) => {
                error!("Failed to process webhook event {} ({}): {}", event.id, event.type_, e);
                send_stripe_webhook_failure_alert(&event.id, &event.type_, &e.to_string());
                if let Err(mark_err) = self.webhook_events.mark_failed(&event.id, &e.to_string()).await {
                    error!("Failed to mark webhook event {} as failed: {}", event.id, mark_err);
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, event: &Event) -> AppResult<ReconcileOutcome> {
        match event.event_type() {
            EventType::PaymentIntentSucceeded => {
                let intent: PaymentIntent = event.object()?;
                self.on_payment_succeeded(&intent).await
            }
            EventType::PaymentIntentPaymentFailed => {
                let intent: PaymentIntent = event.object()?;
                self.on_payment_failed(&intent).await
            }
            EventType::CheckoutSessionCompleted => {
                let session: CheckoutSession = event.object()?;
                self.on_checkout_completed(&session).await
            }
            EventType::Other(event_type) => {
                info!("Ignoring webhook event {} of type {}", event.id, event_type);
                Ok(ReconcileOutcome::Ignored {
                    reason: format!("Unhandled event type {}", event_type),
                })
            }
        }
    }

    pub async fn on_payment_succeeded(&self, intent: &PaymentIntent) -> AppResult<ReconcileOutcome> {
        self.settle_success(SucceededCharge {
            external_payment_id: &intent.id,
            metadata: &intent.metadata,
            amount_minor: intent.amount_received.unwrap_or(intent.amount),
            subtotal_minor: None,
            currency: &intent.currency,
            customer_id: intent.customer.as_deref(),
            payment_method_id: intent.payment_method_id(),
        })
        .await
    }

    /// A paid checkout credits through the same path as its payment intent, so
    /// whichever event arrives second is a duplicate.
    pub async fn on_checkout_completed(&self, session: &CheckoutSession) -> AppResult<ReconcileOutcome> {
        if session.mode != CheckoutSessionMode::Payment || !session.is_paid() {
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("Checkout session {} is not a paid one-time payment", session.id),
            });
        }
        let Some(payment_intent_id) = session.payment_intent.as_deref() else {
            warn!("Paid checkout session {} has no payment intent", session.id);
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("Checkout session {} has no payment intent", session.id),
            });
        };

        self.settle_success(SucceededCharge {
            external_payment_id: payment_intent_id,
            metadata: &session.metadata,
            amount_minor: session.amount_total.unwrap_or_default(),
            subtotal_minor: session.amount_subtotal,
            currency: session.currency.as_deref().unwrap_or(&self.default_currency),
            customer_id: session.customer.as_deref(),
            payment_method_id: None,
        })
        .await
    }

    /// Marks a pending record failed. Nothing touches the ledger.
    pub async fn on_payment_failed(&self, intent: &PaymentIntent) -> AppResult<ReconcileOutcome> {
        let reason = intent.failure_reason();

        let record = match self.payments.mark_failed(&intent.id, &reason).await? {
            Some(record) => record,
            None => {
                let new = match record_from_metadata(
                    &intent.id,
                    &intent.metadata,
                    intent.amount,
                    None,
                    &intent.currency,
                ) {
                    Ok(Some(new)) => new,
                    Ok(None) => {
                        return Ok(ReconcileOutcome::Ignored {
                            reason: format!("Payment {} is not one of ours", intent.id),
                        });
                    }
                    Err(e) => {
                        warn!("Failed payment {} has unusable metadata: {}", intent.id, e);
                        return Ok(ReconcileOutcome::Ignored { reason: e.to_string() });
                    }
                };
                self.payments.create_pending(&new).await?;
                self.payments.mark_failed(&intent.id, &reason).await?.ok_or_else(|| {
                    AppError::Internal(format!("Payment record {} vanished after insert", intent.id))
                })?
            }
        };

        if record.status == PaymentStatus::Succeeded {
            info!("Ignoring failure for already settled payment {}", record.external_payment_id);
            return Ok(ReconcileOutcome::AlreadySettled { record });
        }

        warn!(
            "Payment {} for tenant {} failed: {}",
            record.external_payment_id, record.tenant_id, reason
        );
        Ok(ReconcileOutcome::MarkedFailed { record })
    }

    async fn settle_success(&self, charge: SucceededCharge<'_>) -> AppResult<ReconcileOutcome> {
        let tenant_hint = charge
            .metadata
            .get(metadata_keys::TENANT_ID)
            .and_then(|t| Uuid::parse_str(t).ok());

        let completion = match self.resolve_record(&charge).await {
            Ok(Some(record)) => self.payments.complete_payment(&record).await,
            Ok(None) => {
                info!("Payment {} carries no ledger metadata, ignoring", charge.external_payment_id);
                return Ok(ReconcileOutcome::Ignored {
                    reason: format!("Payment {} is not one of ours", charge.external_payment_id),
                });
            }
            Err(e) => Err(e),
        };

        let completion = match completion {
            Ok(completion) => completion,
            Err(e) => {
                return Err(self
                    .flag_for_review(charge.external_payment_id, tenant_hint, &e)
                    .await);
            }
        };

        log_outcome(&completion.ledger);
        let record = completion.record;
        match completion.ledger {
            ApplyOutcome::Duplicate { balance, .. } => Ok(ReconcileOutcome::Duplicate { record, balance }),
            ApplyOutcome::Applied { balance_after, .. } => {
                info!(
                    "Credited {} credits to tenant {} for payment {}",
                    record.credits_purchased, record.tenant_id, record.external_payment_id
                );
                self.after_credit(&record, &charge).await;
                Ok(ReconcileOutcome::Credited {
                    record,
                    balance: balance_after,
                })
            }
        }
    }

    async fn resolve_record(&self, charge: &SucceededCharge<'_>) -> AppResult<Option<NewPaymentRecord>> {
        if let Some(existing) = self.payments.find_by_external_id(charge.external_payment_id).await? {
            if let Some(tenant) = charge.metadata.get(metadata_keys::TENANT_ID) {
                if tenant != &existing.tenant_id.to_string() {
                    return Err(AppError::ReconciliationInconsistency(format!(
                        "Payment {} is recorded for tenant {} but the processor names tenant {}",
                        existing.external_payment_id, existing.tenant_id, tenant
                    )));
                }
            }
            if !charge.currency.eq_ignore_ascii_case(&existing.currency) {
                return Err(AppError::ReconciliationInconsistency(format!(
                    "Payment {} is recorded in {} but the processor charged {}",
                    existing.external_payment_id, existing.currency, charge.currency
                )));
            }
            validate_stripe_amount_matches(charge.amount_minor, &existing.amount, &existing.currency)
                .map_err(|e| {
                    AppError::ReconciliationInconsistency(format!(
                        "Payment {} does not match its record: {}",
                        existing.external_payment_id, e
                    ))
                })?;
            return Ok(Some(NewPaymentRecord::from(&existing)));
        }

        record_from_metadata(
            charge.external_payment_id,
            charge.metadata,
            charge.amount_minor,
            charge.subtotal_minor,
            charge.currency,
        )
    }

    /// Post-credit work. Failures here are logged and never undo the credit.
    async fn after_credit(&self, record: &PaymentRecord, charge: &SucceededCharge<'_>) {
        if let Some(payment_method_id) = charge.payment_method_id {
            if let Err(e) = self
                .payment_methods
                .remember_from_payment(record.tenant_id, payment_method_id, charge.customer_id)
                .await
            {
                warn!(
                    "Could not save payment method {} for tenant {}: {}",
                    payment_method_id, record.tenant_id, e
                );
            }
        }

        if let Err(e) = self.billing.retry_suspended(record.tenant_id, Utc::now()).await {
            warn!(
                "Retrying suspended subscriptions for tenant {} failed: {}",
                record.tenant_id, e
            );
        }
    }

    /// Queue the payment for manual review and alert. Returns the error the
    /// webhook should surface: the inconsistency, or the queueing failure itself.
    async fn flag_for_review(
        &self,
        external_payment_id: &str,
        tenant_id: Option<Uuid>,
        cause: &AppError,
    ) -> AppError {
        let kind = match cause {
            AppError::ReconciliationInconsistency(_) => "inconsistent_payment",
            AppError::Validation(_) | AppError::InvalidArgument(_) => "invalid_metadata",
            _ => "ledger_apply_failed",
        };
        let detail = cause.to_string();
        error!(
            "Payment {} succeeded at the processor but could not be credited: {}",
            external_payment_id, detail
        );

        let issue = NewReconciliationIssue {
            tenant_id,
            external_payment_id: external_payment_id.to_string(),
            kind: kind.to_string(),
            detail: detail.clone(),
        };
        if let Err(e) = self.review_queue.enqueue(&issue).await {
            error!("Failed to queue payment {} for review: {}", external_payment_id, e);
            return e;
        }
        send_reconciliation_alert(external_payment_id, tenant_id, &detail);
        AppError::ReconciliationInconsistency(detail)
    }
}

/// Rebuild a payment record from the metadata stamped at charge time.
/// `Ok(None)` when the charge carries no tenant, i.e. it did not come from us.
fn record_from_metadata(
    external_payment_id: &str,
    metadata: &HashMap<String, String>,
    amount_minor: i64,
    subtotal_minor: Option<i64>,
    currency: &str,
) -> AppResult<Option<NewPaymentRecord>> {
    let Some(tenant) = metadata.get(metadata_keys::TENANT_ID) else {
        return Ok(None);
    };
    let tenant_id = Uuid::parse_str(tenant)
        .map_err(|_| AppError::InvalidArgument(format!("Invalid tenant_id in metadata: {}", tenant)))?;

    let credits_raw = metadata
        .get(metadata_keys::CREDITS)
        .ok_or_else(|| AppError::InvalidArgument("Missing credits in metadata".to_string()))?;
    let credits_purchased: i64 = credits_raw
        .parse()
        .map_err(|_| AppError::InvalidArgument(format!("Invalid credits in metadata: {}", credits_raw)))?;
    if credits_purchased <= 0 {
        return Err(AppError::InvalidArgument(format!(
            "Credits in metadata must be positive: {}",
            credits_purchased
        )));
    }
    validate_credit_amount(credits_purchased, "Purchase")?;

    let package_id = metadata
        .get(metadata_keys::PACKAGE_ID)
        .and_then(|p| Uuid::parse_str(p).ok());
    let is_auto_recharge = metadata
        .get(metadata_keys::IS_AUTO_RECHARGE)
        .is_some_and(|v| v == "true");
    let tax_rate = match metadata.get(metadata_keys::TAX_RATE) {
        Some(rate) => BigDecimal::from_str(rate)?,
        None => BigDecimal::zero(),
    };

    let currency = currency.to_lowercase();
    let amount = stripe_cents_to_decimal(amount_minor, &currency)?;
    let subtotal = match subtotal_minor {
        Some(minor) => stripe_cents_to_decimal(minor, &currency)?,
        None => round_for_currency(&(&amount / (BigDecimal::from(1) + &tax_rate)), &currency)?,
    };
    let tax_amount = &amount - &subtotal;

    Ok(Some(NewPaymentRecord {
        external_payment_id: external_payment_id.to_string(),
        tenant_id,
        amount,
        subtotal,
        tax_amount,
        tax_rate,
        currency,
        credits_purchased,
        package_id,
        is_auto_recharge,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ScriptedProcessor;
    use crate::db::memory_store::MemoryStore;
    use crate::db::repositories::{CreditLedgerRepository, PaymentCompletion, SubscriptionRepository};
    use async_trait::async_trait;
    use crate::models::{
        BalancePolicy, NewCreditTransaction, NewMeteredSubscription, SubscriptionStatus, TransactionType,
    };
    use crate::services::billing_cycle_service::CycleSettings;
    use crate::services::notification_queue::{LogNotificationDispatcher, NotificationQueue};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        processor: Arc<ScriptedProcessor>,
        billing: BillingCycleService,
        reconciler: PaymentReconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(ScriptedProcessor::new());
        let methods = PaymentMethodService::new(store.clone(), processor.clone());
        let (queue, _worker) = NotificationQueue::start(Arc::new(LogNotificationDispatcher), 16, 1);
        let billing = BillingCycleService::new(
            store.clone(),
            queue,
            CycleSettings {
                period: Duration::days(30),
                retry_offset: Duration::days(7),
                concurrency: 2,
            },
        );
        let reconciler = PaymentReconciler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            methods,
            billing.clone(),
            "usd",
        );
        Fixture { store, processor, billing, reconciler }
    }

    /// Payment records whose ledger write always fails
    struct UnavailableLedger(Arc<MemoryStore>);

    #[async_trait]
    impl PaymentRecordRepository for UnavailableLedger {
        async fn create_pending(&self, record: &NewPaymentRecord) -> AppResult<PaymentRecord> {
            self.0.create_pending(record).await
        }

        async fn find_by_external_id(&self, external_payment_id: &str) -> AppResult<Option<PaymentRecord>> {
            self.0.find_by_external_id(external_payment_id).await
        }

        async fn complete_payment(&self, _record: &NewPaymentRecord) -> AppResult<PaymentCompletion> {
            Err(AppError::Database("connection reset by peer".to_string()))
        }

        async fn mark_failed(
            &self,
            external_payment_id: &str,
            reason: &str,
        ) -> AppResult<Option<PaymentRecord>> {
            PaymentRecordRepository::mark_failed(self.0.as_ref(), external_payment_id, reason).await
        }

        async fn list_for_tenant(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<PaymentRecord>> {
            PaymentRecordRepository::list_for_tenant(self.0.as_ref(), tenant_id, limit).await
        }
    }

    fn pending_record(external_payment_id: &str, tenant_id: Uuid, amount: &str) -> NewPaymentRecord {
        NewPaymentRecord {
            external_payment_id: external_payment_id.to_string(),
            tenant_id,
            amount: BigDecimal::from_str(amount).unwrap(),
            subtotal: BigDecimal::from_str(amount).unwrap(),
            tax_amount: BigDecimal::zero(),
            tax_rate: BigDecimal::zero(),
            currency: "usd".to_string(),
            credits_purchased: 1000,
            package_id: None,
            is_auto_recharge: false,
        }
    }

    fn metadata(tenant: Uuid, credits: i64) -> serde_json::Value {
        json!({
            "tenant_id": tenant.to_string(),
            "credits": credits.to_string(),
            "tax_rate": "0.0825",
            "is_auto_recharge": "false"
        })
    }

    fn intent_event(event_id: &str, event_type: &str, intent: serde_json::Value) -> Event {
        serde_json::from_value(json!({
            "id": event_id,
            "type": event_type,
            "created": 1700000000,
            "data": { "object": intent }
        }))
        .unwrap()
    }

    fn succeeded(event_id: &str, intent_id: &str, tenant: Uuid, credits: i64) -> Event {
        intent_event(
            event_id,
            "payment_intent.succeeded",
            json!({
                "id": intent_id,
                "amount": 1083,
                "amount_received": 1083,
                "currency": "usd",
                "customer": "cus_live_1",
                "status": "succeeded",
                "created": 1700000000,
                "payment_method": "pm_card_saved",
                "metadata": metadata(tenant, credits)
            }),
        )
    }

    fn failed(event_id: &str, intent_id: &str, tenant: Uuid) -> Event {
        intent_event(
            event_id,
            "payment_intent.payment_failed",
            json!({
                "id": intent_id,
                "amount": 1083,
                "currency": "usd",
                "status": "requires_payment_method",
                "created": 1700000000,
                "metadata": metadata(tenant, 1000),
                "last_payment_error": { "message": "Your card has insufficient funds." }
            }),
        )
    }

    #[tokio::test]
    async fn redelivered_success_credits_once() {
        let f = fixture();
        let tenant = Uuid::new_v4();

        let first = f.reconciler.process_webhook(&succeeded("evt_1", "pi_1", tenant, 1000)).await.unwrap();
        assert!(matches!(
            first,
            WebhookDisposition::Processed(ReconcileOutcome::Credited { balance: 1000, .. })
        ));

        let again = f.reconciler.process_webhook(&succeeded("evt_1", "pi_1", tenant, 1000)).await.unwrap();
        assert!(matches!(again, WebhookDisposition::AlreadyProcessed));

        // Same payment under a new event id hits the ledger reference instead
        let other = f.reconciler.process_webhook(&succeeded("evt_2", "pi_1", tenant, 1000)).await.unwrap();
        assert!(matches!(
            other,
            WebhookDisposition::Processed(ReconcileOutcome::Duplicate { balance: 1000, .. })
        ));

        assert_eq!(f.store.balance(tenant).await.unwrap(), 1000);
        assert_eq!(f.store.count_transactions(tenant).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn webhook_before_record_creates_it_from_metadata() {
        let f = fixture();
        let tenant = Uuid::new_v4();

        f.reconciler.process_webhook(&succeeded("evt_1", "pi_early", tenant, 1000)).await.unwrap();

        let record = f.store.find_by_external_id("pi_early").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Succeeded);
        assert_eq!(record.amount, BigDecimal::from_str("10.83").unwrap());
        assert_eq!(record.subtotal, BigDecimal::from_str("10.00").unwrap());
        assert_eq!(record.tax_amount, BigDecimal::from_str("0.83").unwrap());
    }

    #[tokio::test]
    async fn checkout_and_intent_events_credit_once() {
        let f = fixture();
        let tenant = Uuid::new_v4();
        let checkout: Event = serde_json::from_value(json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "created": 1700000000,
            "data": { "object": {
                "id": "cs_1",
                "mode": "payment",
                "payment_intent": "pi_checkout",
                "payment_status": "paid",
                "currency": "usd",
                "amount_subtotal": 1000,
                "amount_total": 1083,
                "customer": "cus_live_1",
                "created": 1700000000,
                "metadata": metadata(tenant, 1000)
            }}
        }))
        .unwrap();

        f.reconciler.process_webhook(&checkout).await.unwrap();
        let second = f
            .reconciler
            .process_webhook(&succeeded("evt_pi", "pi_checkout", tenant, 1000))
            .await
            .unwrap();

        assert!(matches!(
            second,
            WebhookDisposition::Processed(ReconcileOutcome::Duplicate { .. })
        ));
        assert_eq!(f.store.balance(tenant).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn failure_marks_pending_and_never_downgrades_success() {
        let f = fixture();
        let tenant = Uuid::new_v4();

        let outcome = f.reconciler.process_webhook(&failed("evt_f1", "pi_declined", tenant)).await.unwrap();
        match outcome {
            WebhookDisposition::Processed(ReconcileOutcome::MarkedFailed { record }) => {
                assert_eq!(record.status, PaymentStatus::Failed);
                assert_eq!(record.failure_reason.as_deref(), Some("Your card has insufficient funds."));
            }
            other => panic!("unexpected disposition {:?}", other),
        }
        assert_eq!(f.store.count_transactions(tenant).await.unwrap(), 0);

        f.reconciler.process_webhook(&succeeded("evt_s", "pi_ok", tenant, 500)).await.unwrap();
        let late = f.reconciler.process_webhook(&failed("evt_f2", "pi_ok", tenant)).await.unwrap();
        assert!(matches!(
            late,
            WebhookDisposition::Processed(ReconcileOutcome::AlreadySettled { .. })
        ));
        assert_eq!(f.store.balance(tenant).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn tenant_mismatch_goes_to_review_without_credit() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        f.store
            .create_pending(&pending_record("pi_shared", owner, "10.83"))
            .await
            .unwrap();

        let outcome = f
            .reconciler
            .process_webhook(&succeeded("evt_1", "pi_shared", intruder, 1000))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookDisposition::ReviewQueued { .. }));

        let issues = f.store.list_open().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].external_payment_id, "pi_shared");
        assert_eq!(issues[0].kind, "inconsistent_payment");
        assert_eq!(f.store.balance(owner).await.unwrap(), 0);
        assert_eq!(f.store.balance(intruder).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn amount_mismatch_goes_to_review_without_credit() {
        let f = fixture();
        let tenant = Uuid::new_v4();
        f.store.create_pending(&pending_record("pi_short", tenant, "10.00")).await.unwrap();

        // Record says $10.00, processor reports $10.83
        let outcome = f
            .reconciler
            .process_webhook(&succeeded("evt_1", "pi_short", tenant, 1000))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookDisposition::ReviewQueued { .. }));

        let issues = f.store.list_open().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, "inconsistent_payment");
        assert!(issues[0].detail.contains("mismatch"));

        let record = f.store.find_by_external_id("pi_short").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Pending);
        assert_eq!(f.store.balance(tenant).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_ledger_write_is_queued_for_review() {
        let f = fixture();
        let methods = PaymentMethodService::new(f.store.clone(), f.processor.clone());
        let reconciler = PaymentReconciler::new(
            Arc::new(UnavailableLedger(f.store.clone())),
            f.store.clone(),
            f.store.clone(),
            methods,
            f.billing.clone(),
            "usd",
        );
        let tenant = Uuid::new_v4();

        let outcome = reconciler
            .process_webhook(&succeeded("evt_1", "pi_stuck", tenant, 1000))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookDisposition::ReviewQueued { .. }));

        let issues = f.store.list_open().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].external_payment_id, "pi_stuck");
        assert_eq!(issues[0].kind, "ledger_apply_failed");
        assert_eq!(issues[0].tenant_id, Some(tenant));
        assert_eq!(f.store.balance(tenant).await.unwrap(), 0);
        assert_eq!(f.store.count_transactions(tenant).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn credit_saves_new_payment_method() {
        let f = fixture();
        let tenant = Uuid::new_v4();
        f.reconciler.process_webhook(&succeeded("evt_1", "pi_1", tenant, 1000)).await.unwrap();

        assert_eq!(f.processor.attached_methods().len(), 1);
        let methods = f.reconciler.payment_methods.list(tenant).await.unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].id, "pm_card_saved");
        assert!(methods[0].is_default);
    }

    #[tokio::test]
    async fn credit_reactivates_suspended_subscription() {
        let f = fixture();
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        f.store
            .apply(
                &NewCreditTransaction::new(tenant, 50, TransactionType::Purchase, "seed").with_reference("seed"),
                BalancePolicy::RequireSufficient,
            )
            .await
            .unwrap();
        let sub = f
            .billing
            .register_subscription(
                tenant,
                &NewMeteredSubscription {
                    resource: "+15550100".to_string(),
                    monthly_cost: 100,
                    first_billing_date: Some(now - Duration::minutes(1)),
                },
                now,
            )
            .await
            .unwrap();
        f.billing.run_cycle(now).await.unwrap();

        f.reconciler.process_webhook(&succeeded("evt_1", "pi_topup", tenant, 1000)).await.unwrap();

        let updated = SubscriptionRepository::get(f.store.as_ref(), sub.id).await.unwrap().unwrap();
        assert_eq!(updated.status, SubscriptionStatus::Active);
        assert_eq!(f.store.balance(tenant).await.unwrap(), 950);
    }

    #[tokio::test]
    async fn foreign_payments_are_ignored() {
        let f = fixture();
        let event = intent_event(
            "evt_other",
            "payment_intent.succeeded",
            json!({
                "id": "pi_foreign",
                "amount": 500,
                "currency": "usd",
                "status": "succeeded",
                "created": 1700000000
            }),
        );
        let outcome = f.reconciler.process_webhook(&event).await.unwrap();
        assert!(matches!(
            outcome,
            WebhookDisposition::Processed(ReconcileOutcome::Ignored { .. })
        ));
    }
}
