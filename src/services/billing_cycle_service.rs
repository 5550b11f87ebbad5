use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::settings::BillingConfig;
use crate::db::repositories::{ChargeTerms, SubscriptionChargeOutcome, SubscriptionRepository};
use crate::error::{AppError, AppResult};
use crate::models::{MeteredSubscription, NewMeteredSubscription};
use crate::services::notification_queue::{Notification, NotificationKind, NotificationQueue};
use crate::utils::admin_alerting::send_billing_cycle_failure_alert;

#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub period: Duration,
    pub retry_offset: Duration,
    pub concurrency: usize,
}

impl From<&BillingConfig> for CycleSettings {
    fn from(config: &BillingConfig) -> Self {
        Self {
            period: Duration::days(config.billing_period_days),
            retry_offset: Duration::days(config.suspension_retry_days),
            concurrency: config.cycle_concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleFailure {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub error: String,
}

/// Outcome of one pass over due subscriptions
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub processed: usize,
    pub charged: usize,
    pub reactivated: usize,
    pub suspended: usize,
    pub skipped: usize,
    pub failures: Vec<CycleFailure>,
}

impl CycleReport {
    fn merge(&mut self, other: CycleReport) {
        self.processed += other.processed;
        self.charged += other.charged;
        self.reactivated += other.reactivated;
        self.suspended += other.suspended;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    /// Turns a report with failures into `SchedulerPartialFailure`.
    pub fn ensure_complete(&self) -> AppResult<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(AppError::SchedulerPartialFailure(format!(
            "{} of {} subscriptions failed; first: {}",
            self.failures.len(),
            self.processed,
            self.failures[0].error
        )))
    }
}

/// Charges recurring subscriptions against tenant balances.
#[derive(Clone)]
pub struct BillingCycleService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    notifications: NotificationQueue,
    settings: CycleSettings,
}

impl BillingCycleService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        notifications: NotificationQueue,
        settings: CycleSettings,
    ) -> Self {
        Self {
            subscriptions,
            notifications,
            settings,
        }
    }

    pub async fn register_subscription(
        &self,
        tenant_id: Uuid,
        new: &NewMeteredSubscription,
        now: DateTime<Utc>,
    ) -> AppResult<MeteredSubscription> {
        if new.resource.trim().is_empty() {
            return Err(AppError::Validation("Subscription resource is required".to_string()));
        }
        if new.monthly_cost <= 0 {
            return Err(AppError::Validation(format!(
                "Monthly cost must be positive: {}",
                new.monthly_cost
            )));
        }

        let subscription = self.subscriptions.create(tenant_id, new, now).await?;
        info!(
            "Registered subscription {} ({}) for tenant {} at {} credits per period",
            subscription.id, subscription.resource, tenant_id, subscription.monthly_cost
        );
        Ok(subscription)
    }

    pub async fn list_subscriptions(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>> {
        self.subscriptions.list_for_tenant(tenant_id).await
    }

    /// Bill everything due at `now`, tenants in parallel and each tenant's
    /// subscriptions in order. Individual failures land in the report.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> AppResult<CycleReport> {
        let due = self.subscriptions.list_due(now).await?;
        if due.is_empty() {
            info!("Billing cycle at {}: nothing due", now);
            return Ok(CycleReport::default());
        }

        let mut by_tenant: BTreeMap<Uuid, Vec<MeteredSubscription>> = BTreeMap::new();
        for subscription in due {
            by_tenant.entry(subscription.tenant_id).or_default().push(subscription);
        }
        let tenants = by_tenant.len();

        let terms = ChargeTerms {
            now,
            period: self.settings.period,
            retry_offset: self.settings.retry_offset,
            suspend_on_insufficient: true,
        };

        let reports: Vec<CycleReport> = stream::iter(by_tenant.into_values())
            .map(|subscriptions| self.process_tenant(subscriptions, terms))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut report = CycleReport::default();
        for tenant_report in reports {
            report.merge(tenant_report);
        }

        info!(
            "Billing cycle at {}: {} tenants, {} processed, {} charged, {} reactivated, {} suspended, {} skipped, {} failed",
            now,
            tenants,
            report.processed,
            report.charged,
            report.reactivated,
            report.suspended,
            report.skipped,
            report.failures.len()
        );
        if let Some(first) = report.failures.first() {
            send_billing_cycle_failure_alert(report.failures.len(), report.processed, &first.error);
        }
        Ok(report)
    }

    /// Retry a tenant's suspended subscriptions right away, typically after a top-up.
    /// Underfunded subscriptions are left as they are.
    pub async fn retry_suspended(&self, tenant_id: Uuid, now: DateTime<Utc>) -> AppResult<CycleReport> {
        let suspended = self.subscriptions.list_suspended(tenant_id).await?;
        if suspended.is_empty() {
            return Ok(CycleReport::default());
        }

        let terms = ChargeTerms {
            now,
            period: self.settings.period,
            retry_offset: self.settings.retry_offset,
            suspend_on_insufficient: false,
        };
        let report = self.process_tenant(suspended, terms).await;
        if report.reactivated > 0 {
            info!(
                "Reactivated {} suspended subscriptions for tenant {}",
                report.reactivated, tenant_id
            );
        }
        Ok(report)
    }

    async fn process_tenant(&self, subscriptions: Vec<MeteredSubscription>, terms: ChargeTerms) -> CycleReport {
        let mut report = CycleReport::default();
        for subscription in subscriptions {
            report.processed += 1;
            match self.subscriptions.charge_or_suspend(&subscription, &terms).await {
                Ok(SubscriptionChargeOutcome::Charged { subscription: updated, transaction, reactivated }) => {
                    report.charged += 1;
                    if reactivated {
                        report.reactivated += 1;
                    }
                    info!(
                        "Charged subscription {} for tenant {}: {} credits, next billing {}",
                        updated.id, updated.tenant_id, -transaction.amount, updated.next_billing_date
                    );
                }
                Ok(SubscriptionChargeOutcome::Suspended { subscription: updated, balance, newly_suspended }) => {
                    report.suspended += 1;
                    warn!(
                        "Subscription {} for tenant {} suspended: balance {} below {}; retry at {}",
                        updated.id, updated.tenant_id, balance, updated.monthly_cost, updated.next_billing_date
                    );
                    let kind = if newly_suspended {
                        NotificationKind::SubscriptionSuspended
                    } else {
                        NotificationKind::LowBalance
                    };
                    self.notifications.enqueue(Notification {
                        tenant_id: updated.tenant_id,
                        balance,
                        threshold: updated.monthly_cost,
                        kind,
                        detail: Some(format!("Subscription for {} is suspended", updated.resource)),
                    });
                }
                Ok(SubscriptionChargeOutcome::Skipped { reason }) => {
                    report.skipped += 1;
                    info!("Skipped subscription {}: {}", subscription.id, reason);
                }
                Err(e) => {
                    error!(
                        "Failed to bill subscription {} for tenant {}: {}",
                        subscription.id, subscription.tenant_id, e
                    );
                    report.failures.push(CycleFailure {
                        subscription_id: subscription.id,
                        tenant_id: subscription.tenant_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}
