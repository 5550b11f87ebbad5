//! In-process store adapter. Every write goes through one mutex, which gives the
//! same per-tenant serialization the Postgres adapter gets from advisory locks.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::repositories::payment_record_repository::purchase_credit;
use crate::db::repositories::subscription_repository::{advance_billing_date, period_charge};
use crate::db::repositories::webhook_event_repository::PROCESSING_LOCK_MINUTES;
use crate::db::repositories::{
    AutoRechargeRepository, ChargeTerms, CreditLedgerRepository, CreditPackageRepository,
    PaymentCompletion, PaymentMethodRepository, PaymentRecordRepository,
    ReconciliationIssueRepository, SubscriptionChargeOutcome, SubscriptionRepository,
    WebhookClaim, WebhookEventRepository,
};
use crate::error::{AppError, AppResult};
use crate::models::ledger::check_balance;
use crate::models::{
    ApplyOutcome, AutoRechargeSettings, AutoRechargeSettingsUpdate, BalancePolicy,
    BillingCustomer, CreditPackage, CreditTransaction, MeteredSubscription,
    NewCreditTransaction, NewMeteredSubscription, NewPaymentRecord, NewReconciliationIssue,
    PaymentMethod, PaymentRecord, PaymentStatus, ReconciliationIssue, SubscriptionStatus,
    TransactionType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct WebhookEventEntry {
    status: EventStatus,
    attempts: i32,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    transactions: Vec<CreditTransaction>,
    settings: HashMap<Uuid, AutoRechargeSettings>,
    payments: HashMap<String, PaymentRecord>,
    methods: HashMap<String, PaymentMethod>,
    customers: HashMap<Uuid, BillingCustomer>,
    subscriptions: HashMap<Uuid, MeteredSubscription>,
    packages: Vec<CreditPackage>,
    issues: Vec<ReconciliationIssue>,
    webhook_events: HashMap<String, WebhookEventEntry>,
}

impl MemoryState {
    fn balance(&self, tenant_id: Uuid) -> i64 {
        self.transactions
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .map(|t| t.amount)
            .sum()
    }

    fn find_reference(
        &self,
        tenant_id: Uuid,
        transaction_type: TransactionType,
        reference_id: &str,
    ) -> Option<&CreditTransaction> {
        self.transactions.iter().find(|t| {
            t.tenant_id == tenant_id
                && t.transaction_type == transaction_type
                && t.reference_id.as_deref() == Some(reference_id)
        })
    }

    fn apply(&mut self, new_tx: &NewCreditTransaction, policy: BalancePolicy) -> AppResult<ApplyOutcome> {
        new_tx.validate()?;

        if let Some(reference) = new_tx.reference_id.as_deref() {
            if let Some(existing) = self.find_reference(new_tx.tenant_id, new_tx.transaction_type, reference) {
                return Ok(ApplyOutcome::Duplicate {
                    transaction: existing.clone(),
                    balance: self.balance(new_tx.tenant_id),
                });
            }
        }

        let balance = self.balance(new_tx.tenant_id);
        check_balance(new_tx.amount, balance, policy)?;

        let transaction = new_tx.clone().into_transaction(Utc::now());
        self.transactions.push(transaction.clone());
        Ok(ApplyOutcome::Applied {
            transaction,
            balance_after: balance + new_tx.amount,
        })
    }
}

/// Store adapter holding all state in memory
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_packages(packages: Vec<CreditPackage>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                packages,
                ..MemoryState::default()
            }),
        }
    }

    /// The same catalogue the migrations seed.
    pub fn with_default_packages() -> Self {
        Self::with_packages(default_packages())
    }
}

pub fn default_packages() -> Vec<CreditPackage> {
    [
        ("5b1f9a7e-1c0a-4f5e-9d2a-000000000500", "Starter", 500, "5.00"),
        ("5b1f9a7e-1c0a-4f5e-9d2a-000000001000", "Standard", 1000, "10.00"),
        ("5b1f9a7e-1c0a-4f5e-9d2a-000000002500", "Growth", 2500, "24.00"),
        ("5b1f9a7e-1c0a-4f5e-9d2a-000000010000", "Scale", 10000, "90.00"),
    ]
    .into_iter()
    .filter_map(|(id, name, credits, price)| {
        Some(CreditPackage {
            id: Uuid::parse_str(id).ok()?,
            name: name.to_string(),
            credits,
            price: BigDecimal::from_str(price).ok()?,
            currency: "usd".to_string(),
            is_active: true,
        })
    })
    .collect()
}

#[async_trait]
impl CreditLedgerRepository for MemoryStore {
    async fn apply(
        &self,
        transaction: &NewCreditTransaction,
        policy: BalancePolicy,
    ) -> AppResult<ApplyOutcome> {
        self.state.lock().await.apply(transaction, policy)
    }

    async fn balance(&self, tenant_id: Uuid) -> AppResult<i64> {
        Ok(self.state.lock().await.balance(tenant_id))
    }

    async fn transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<CreditTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.tenant_id == tenant_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_transactions(&self, tenant_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().filter(|t| t.tenant_id == tenant_id).count() as i64)
    }
}

#[async_trait]
impl AutoRechargeRepository for MemoryStore {
    async fn get_settings(&self, tenant_id: Uuid) -> AppResult<Option<AutoRechargeSettings>> {
        Ok(self.state.lock().await.settings.get(&tenant_id).cloned())
    }

    async fn upsert_settings(
        &self,
        tenant_id: Uuid,
        update: &AutoRechargeSettingsUpdate,
    ) -> AppResult<AutoRechargeSettings> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let entry = state
            .settings
            .entry(tenant_id)
            .or_insert_with(|| AutoRechargeSettings {
                tenant_id,
                enabled: false,
                minimum_balance: 0,
                recharge_amount: 0,
                payment_method_id: None,
                last_triggered_at: None,
                created_at: now,
                updated_at: now,
            });
        entry.enabled = update.enabled;
        entry.minimum_balance = update.minimum_balance;
        entry.recharge_amount = update.recharge_amount;
        entry.payment_method_id = update.payment_method_id.clone();
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn list_enabled_tenants(&self) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut tenants: Vec<Uuid> = state
            .settings
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.tenant_id)
            .collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn try_claim_trigger(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.settings.get_mut(&tenant_id) {
            Some(settings) if settings.enabled && settings.cooldown_elapsed(now, cooldown) => {
                settings.last_triggered_at = Some(now);
                settings.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PaymentRecordRepository for MemoryStore {
    async fn create_pending(&self, record: &NewPaymentRecord) -> AppResult<PaymentRecord> {
        let mut state = self.state.lock().await;
        let stored = state
            .payments
            .entry(record.external_payment_id.clone())
            .or_insert_with(|| record.clone().into_record(PaymentStatus::Pending, Utc::now()));
        Ok(stored.clone())
    }

    async fn find_by_external_id(&self, external_payment_id: &str) -> AppResult<Option<PaymentRecord>> {
        Ok(self.state.lock().await.payments.get(external_payment_id).cloned())
    }

    async fn complete_payment(&self, record: &NewPaymentRecord) -> AppResult<PaymentCompletion> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut stored = state
            .payments
            .get(&record.external_payment_id)
            .cloned()
            .unwrap_or_else(|| record.clone().into_record(PaymentStatus::Pending, now));

        if stored.tenant_id != record.tenant_id {
            return Err(AppError::ReconciliationInconsistency(format!(
                "Payment {} belongs to tenant {}, event names tenant {}",
                stored.external_payment_id, stored.tenant_id, record.tenant_id
            )));
        }

        if stored.status != PaymentStatus::Succeeded {
            stored.status = PaymentStatus::Succeeded;
            stored.failure_reason = None;
            stored.updated_at = now;
        }

        // Apply before persisting the record so a rejected write leaves nothing behind
        let ledger = state.apply(&purchase_credit(&stored), BalancePolicy::RequireSufficient)?;
        state.payments.insert(stored.external_payment_id.clone(), stored.clone());

        Ok(PaymentCompletion { record: stored, ledger })
    }

    async fn mark_failed(
        &self,
        external_payment_id: &str,
        reason: &str,
    ) -> AppResult<Option<PaymentRecord>> {
        let mut state = self.state.lock().await;
        Ok(state.payments.get_mut(external_payment_id).map(|record| {
            if record.status == PaymentStatus::Pending {
                record.status = PaymentStatus::Failed;
                record.failure_reason = Some(reason.to_string());
                record.updated_at = Utc::now();
            }
            record.clone()
        }))
    }

    async fn list_for_tenant(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<PaymentRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<PaymentRecord> = state
            .payments
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}

#[async_trait]
impl PaymentMethodRepository for MemoryStore {
    async fn upsert(&self, method: &PaymentMethod) -> AppResult<PaymentMethod> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(existing) = state.methods.get(&method.id) {
            if existing.tenant_id != method.tenant_id {
                return Err(AppError::BadRequest(format!(
                    "Payment method {} is registered to another tenant",
                    method.id
                )));
            }
        }

        if method.is_default {
            for other in state.methods.values_mut() {
                if other.tenant_id == method.tenant_id && other.id != method.id {
                    other.is_default = false;
                }
            }
        }

        let previous = state.methods.get(&method.id).cloned();
        let saved = PaymentMethod {
            is_default: method.is_default || previous.as_ref().is_some_and(|p| p.is_default),
            is_active: true,
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            ..method.clone()
        };
        state.methods.insert(saved.id.clone(), saved.clone());
        Ok(saved)
    }

    async fn list_active(&self, tenant_id: Uuid) -> AppResult<Vec<PaymentMethod>> {
        let state = self.state.lock().await;
        let mut methods: Vec<PaymentMethod> = state
            .methods
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.is_active)
            .cloned()
            .collect();
        methods.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(methods)
    }

    async fn get(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<Option<PaymentMethod>> {
        let state = self.state.lock().await;
        Ok(state
            .methods
            .get(payment_method_id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_default(&self, tenant_id: Uuid) -> AppResult<Option<PaymentMethod>> {
        Ok(PaymentMethodRepository::list_active(self, tenant_id)
            .await?
            .into_iter()
            .next())
    }

    async fn deactivate(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.methods.get_mut(payment_method_id) {
            Some(method) if method.tenant_id == tenant_id && method.is_active => {
                method.is_active = false;
                method.is_default = false;
                method.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_customer(&self, tenant_id: Uuid) -> AppResult<Option<BillingCustomer>> {
        Ok(self.state.lock().await.customers.get(&tenant_id).cloned())
    }

    async fn save_customer(&self, tenant_id: Uuid, customer_id: &str) -> AppResult<BillingCustomer> {
        let mut state = self.state.lock().await;
        let customer = state.customers.entry(tenant_id).or_insert_with(|| BillingCustomer {
            tenant_id,
            customer_id: customer_id.to_string(),
            created_at: Utc::now(),
        });
        Ok(customer.clone())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn create(
        &self,
        tenant_id: Uuid,
        new: &NewMeteredSubscription,
        now: DateTime<Utc>,
    ) -> AppResult<MeteredSubscription> {
        let subscription = MeteredSubscription {
            id: Uuid::new_v4(),
            tenant_id,
            resource: new.resource.clone(),
            monthly_cost: new.monthly_cost,
            next_billing_date: new.first_billing_date.unwrap_or(now),
            status: SubscriptionStatus::Active,
            suspended_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<MeteredSubscription>> {
        Ok(self.state.lock().await.subscriptions.get(&id).cloned())
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>> {
        let state = self.state.lock().await;
        let mut subs: Vec<MeteredSubscription> = state
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subs)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> AppResult<Vec<MeteredSubscription>> {
        let state = self.state.lock().await;
        let mut due: Vec<MeteredSubscription> = state
            .subscriptions
            .values()
            .filter(|s| s.next_billing_date <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.tenant_id
                .cmp(&b.tenant_id)
                .then_with(|| a.next_billing_date.cmp(&b.next_billing_date))
        });
        Ok(due)
    }

    async fn list_suspended(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>> {
        let state = self.state.lock().await;
        let mut subs: Vec<MeteredSubscription> = state
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.status == SubscriptionStatus::Suspended)
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.next_billing_date.cmp(&b.next_billing_date));
        Ok(subs)
    }

    async fn charge_or_suspend(
        &self,
        expected: &MeteredSubscription,
        terms: &ChargeTerms,
    ) -> AppResult<SubscriptionChargeOutcome> {
        let mut state = self.state.lock().await;

        let current = state
            .subscriptions
            .get(&expected.id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", expected.id)))?;

        if current.next_billing_date != expected.next_billing_date || current.status != expected.status {
            return Ok(SubscriptionChargeOutcome::Skipped {
                reason: "already processed for this period".to_string(),
            });
        }

        let balance = state.balance(current.tenant_id);

        if balance >= current.monthly_cost {
            let ledger = state.apply(&period_charge(&current), BalancePolicy::RequireSufficient)?;
            let mut updated = current.clone();
            updated.next_billing_date = advance_billing_date(&current, terms);
            updated.status = SubscriptionStatus::Active;
            updated.suspended_at = None;
            updated.updated_at = terms.now;
            state.subscriptions.insert(updated.id, updated.clone());
            return Ok(SubscriptionChargeOutcome::Charged {
                subscription: updated,
                transaction: ledger.transaction().clone(),
                reactivated: current.status == SubscriptionStatus::Suspended,
            });
        }

        if !terms.suspend_on_insufficient {
            return Ok(SubscriptionChargeOutcome::Skipped {
                reason: format!("balance {} below monthly cost {}", balance, current.monthly_cost),
            });
        }

        let mut updated = current.clone();
        updated.status = SubscriptionStatus::Suspended;
        updated.suspended_at = Some(current.suspended_at.unwrap_or(terms.now));
        updated.next_billing_date = terms.now + terms.retry_offset;
        updated.updated_at = terms.now;
        state.subscriptions.insert(updated.id, updated.clone());

        Ok(SubscriptionChargeOutcome::Suspended {
            subscription: updated,
            balance,
            newly_suspended: current.status == SubscriptionStatus::Active,
        })
    }
}

#[async_trait]
impl CreditPackageRepository for MemoryStore {
    async fn list_active(&self) -> AppResult<Vec<CreditPackage>> {
        let state = self.state.lock().await;
        let mut packages: Vec<CreditPackage> =
            state.packages.iter().filter(|p| p.is_active).cloned().collect();
        packages.sort_by_key(|p| p.credits);
        Ok(packages)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<CreditPackage>> {
        let state = self.state.lock().await;
        Ok(state.packages.iter().find(|p| p.id == id).cloned())
    }
}

#[async_trait]
impl ReconciliationIssueRepository for MemoryStore {
    async fn enqueue(&self, issue: &NewReconciliationIssue) -> AppResult<ReconciliationIssue> {
        let stored = ReconciliationIssue {
            id: Uuid::new_v4(),
            tenant_id: issue.tenant_id,
            external_payment_id: issue.external_payment_id.clone(),
            kind: issue.kind.clone(),
            detail: issue.detail.clone(),
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.state.lock().await.issues.push(stored.clone());
        Ok(stored)
    }

    async fn list_open(&self) -> AppResult<Vec<ReconciliationIssue>> {
        let state = self.state.lock().await;
        Ok(state.issues.iter().filter(|i| i.resolved_at.is_none()).cloned().collect())
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryStore {
    async fn claim(&self, event_id: &str, _event_type: &str) -> AppResult<WebhookClaim> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let entry = state
            .webhook_events
            .entry(event_id.to_string())
            .or_insert_with(|| WebhookEventEntry {
                status: EventStatus::Failed,
                attempts: 0,
                last_error: None,
                updated_at: now,
            });

        match entry.status {
            EventStatus::Completed => Ok(WebhookClaim::AlreadyCompleted),
            EventStatus::Processing
                if now - entry.updated_at < Duration::minutes(PROCESSING_LOCK_MINUTES) =>
            {
                Ok(WebhookClaim::InProgress)
            }
            _ => {
                entry.status = EventStatus::Processing;
                entry.attempts += 1;
                entry.updated_at = now;
                Ok(WebhookClaim::Claimed)
            }
        }
    }

    async fn mark_completed(&self, event_id: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.webhook_events.get_mut(event_id) {
            entry.status = EventStatus::Completed;
            entry.last_error = None;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, error: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.webhook_events.get_mut(event_id) {
            entry.status = EventStatus::Failed;
            entry.last_error = Some(error.to_string());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}
