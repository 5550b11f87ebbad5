use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repositories::credit_package_repository::smallest_covering;
use crate::db::repositories::{AutoRechargeRepository, CreditLedgerRepository, CreditPackageRepository};
use crate::error::{AppError, AppResult};
use crate::models::{AutoRechargeSettings, AutoRechargeSettingsUpdate};
use crate::services::notification_queue::{Notification, NotificationKind, NotificationQueue};
use crate::services::payment_initiator::{ChargeRequest, InitiatedCharge, PaymentInitiator};
use crate::services::payment_method_service::PaymentMethodService;
use crate::utils::financial_validation::validate_auto_recharge_settings;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RechargeDecision {
    NotConfigured,
    Disabled,
    AboveThreshold { balance: i64, minimum_balance: i64 },
    CoolingDown { last_triggered_at: Option<DateTime<Utc>> },
    /// A concurrent evaluation claimed the trigger first
    ClaimLost,
    NoPackage { recharge_amount: i64 },
    Initiated(InitiatedCharge),
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeFailure {
    pub tenant_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub evaluated: usize,
    pub initiated: usize,
    pub declined: usize,
    pub failures: Vec<RechargeFailure>,
}

/// Tops balances up from a stored payment method when they fall to the threshold.
#[derive(Clone)]
pub struct AutoRechargeService {
    settings: Arc<dyn AutoRechargeRepository>,
    ledger: Arc<dyn CreditLedgerRepository>,
    packages: Arc<dyn CreditPackageRepository>,
    initiator: PaymentInitiator,
    payment_methods: PaymentMethodService,
    notifications: NotificationQueue,
    cooldown: Duration,
}

impl AutoRechargeService {
    pub fn new(
        settings: Arc<dyn AutoRechargeRepository>,
        ledger: Arc<dyn CreditLedgerRepository>,
        packages: Arc<dyn CreditPackageRepository>,
        initiator: PaymentInitiator,
        payment_methods: PaymentMethodService,
        notifications: NotificationQueue,
        cooldown: Duration,
    ) -> Self {
        Self {
            settings,
            ledger,
            packages,
            initiator,
            payment_methods,
            notifications,
            cooldown,
        }
    }

    pub async fn get_settings(&self, tenant_id: Uuid) -> AppResult<Option<AutoRechargeSettings>> {
        self.settings.get_settings(tenant_id).await
    }

    pub async fn update_settings(
        &self,
        tenant_id: Uuid,
        update: &AutoRechargeSettingsUpdate,
    ) -> AppResult<AutoRechargeSettings> {
        validate_auto_recharge_settings(update)?;

        if update.enabled {
            match update.payment_method_id.as_deref() {
                Some(pm) => {
                    if !self.payment_methods.is_active_method(tenant_id, pm).await? {
                        return Err(AppError::BadRequest(format!(
                            "Payment method {} is not an active method of this tenant",
                            pm
                        )));
                    }
                }
                None => {
                    self.payment_methods
                        .resolve_for_charge(tenant_id, None)
                        .await
                        .map_err(|_| {
                            AppError::BadRequest(
                                "A payment method is required before enabling auto-recharge".to_string(),
                            )
                        })?;
                }
            }

            let packages = self.packages.list_active().await?;
            if smallest_covering(&packages, update.recharge_amount).is_none() {
                return Err(AppError::Validation(format!(
                    "No credit package covers a recharge of {} credits",
                    update.recharge_amount
                )));
            }
        }

        let saved = self.settings.upsert_settings(tenant_id, update).await?;
        info!(
            "Auto-recharge for tenant {} {}: minimum {} recharge {}",
            tenant_id,
            if saved.enabled { "enabled" } else { "disabled" },
            saved.minimum_balance,
            saved.recharge_amount
        );
        Ok(saved)
    }

    /// Start a recharge if the tenant is at or below its threshold and outside the cooldown.
    pub async fn evaluate(&self, tenant_id: Uuid, now: DateTime<Utc>) -> AppResult<RechargeDecision> {
        self.run(tenant_id, now, true).await
    }

    /// Manual recharge. Skips the threshold but not the cooldown.
    pub async fn trigger_now(&self, tenant_id: Uuid, now: DateTime<Utc>) -> AppResult<RechargeDecision> {
        match self.run(tenant_id, now, false).await? {
            RechargeDecision::NotConfigured => Err(AppError::NotFound(format!(
                "Auto-recharge is not configured for tenant {}",
                tenant_id
            ))),
            RechargeDecision::Disabled => Err(AppError::BadRequest(
                "Auto-recharge is disabled for this tenant".to_string(),
            )),
            decision => Ok(decision),
        }
    }

    /// Evaluate every enabled tenant. One tenant's error never stops the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let tenants = self.settings.list_enabled_tenants().await?;
        let mut report = SweepReport::default();

        for tenant_id in tenants {
            report.evaluated += 1;
            match self.evaluate(tenant_id, now).await {
                Ok(RechargeDecision::Initiated(_)) => report.initiated += 1,
                Ok(RechargeDecision::Failed { .. }) => report.declined += 1,
                Ok(_) => {}
                Err(e) => {
                    error!("Auto-recharge evaluation failed for tenant {}: {}", tenant_id, e);
                    report.failures.push(RechargeFailure {
                        tenant_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Auto-recharge sweep: {} evaluated, {} initiated, {} declined, {} failed",
            report.evaluated,
            report.initiated,
            report.declined,
            report.failures.len()
        );
        Ok(report)
    }

    async fn run(&self, tenant_id: Uuid, now: DateTime<Utc>, check_threshold: bool) -> AppResult<RechargeDecision> {
        let Some(settings) = self.settings.get_settings(tenant_id).await? else {
            return Ok(RechargeDecision::NotConfigured);
        };
        if !settings.enabled {
            return Ok(RechargeDecision::Disabled);
        }

        let balance = self.ledger.balance(tenant_id).await?;
        if check_threshold && balance > settings.minimum_balance {
            debug!(
                "Tenant {} balance {} above auto-recharge threshold {}",
                tenant_id, balance, settings.minimum_balance
            );
            return Ok(RechargeDecision::AboveThreshold {
                balance,
                minimum_balance: settings.minimum_balance,
            });
        }

        if !settings.cooldown_elapsed(now, self.cooldown) {
            debug!("Auto-recharge for tenant {} is cooling down", tenant_id);
            return Ok(RechargeDecision::CoolingDown {
                last_triggered_at: settings.last_triggered_at,
            });
        }

        let packages = self.packages.list_active().await?;
        let Some(package) = smallest_covering(&packages, settings.recharge_amount).cloned() else {
            warn!(
                "No credit package covers the {} credit recharge for tenant {}",
                settings.recharge_amount, tenant_id
            );
            return Ok(RechargeDecision::NoPackage {
                recharge_amount: settings.recharge_amount,
            });
        };

        if !self.settings.try_claim_trigger(tenant_id, now, self.cooldown).await? {
            info!("Auto-recharge for tenant {} already claimed by another evaluation", tenant_id);
            return Ok(RechargeDecision::ClaimLost);
        }

        info!(
            "Auto-recharge triggered for tenant {}: balance {} minimum {}, buying {} ({} credits)",
            tenant_id, balance, settings.minimum_balance, package.name, package.credits
        );

        let request = ChargeRequest {
            tenant_id,
            package,
            payment_method_id: settings.payment_method_id.clone(),
            is_auto_recharge: true,
        };
        match self.initiator.initiate(request).await {
            Ok(charge) => Ok(RechargeDecision::Initiated(charge)),
            Err(e @ (AppError::PaymentProvider(_) | AppError::BadRequest(_) | AppError::External(_))) => {
                let reason = e.to_string();
                warn!("Auto-recharge for tenant {} failed: {}", tenant_id, reason);
                self.notifications.enqueue(Notification {
                    tenant_id,
                    balance,
                    threshold: settings.minimum_balance,
                    kind: NotificationKind::AutoRechargeFailed,
                    detail: Some(reason.clone()),
                });
                Ok(RechargeDecision::Failed { reason })
            }
            Err(e) => Err(e),
        }
    }
}
