use bigdecimal::BigDecimal;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::{OffSessionChargeRequest, PaymentProcessor, PaymentProviderError};
use crate::db::repositories::{CreditPackageRepository, PaymentRecordRepository};
use crate::error::{AppError, AppResult};
use crate::models::{CreditPackage, NewPaymentRecord, PaymentRecord};
use crate::services::payment_method_service::PaymentMethodService;
use crate::stripe_types::{PaymentIntent, PaymentIntentStatus};
use crate::utils::admin_alerting::send_payment_processing_alert;
use crate::utils::financial_validation::{normalize_money, validate_package_price, validate_tax_rate};
use crate::utils::stripe_currency_utils::{decimal_to_stripe_cents, round_for_currency};

/// Metadata keys stamped on every charge and read back by the reconciler
pub mod metadata_keys {
    pub const TENANT_ID: &str = "tenant_id";
    pub const CREDITS: &str = "credits";
    pub const ATTEMPT_ID: &str = "attempt_id";
    pub const PACKAGE_ID: &str = "package_id";
    pub const IS_AUTO_RECHARGE: &str = "is_auto_recharge";
    pub const TAX_RATE: &str = "tax_rate";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub subtotal: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
}

/// The single tax step applied to package prices
pub trait TaxCalculator: Send + Sync {
    fn calculate(&self, subtotal: &BigDecimal, currency: &str) -> AppResult<TaxBreakdown>;
}

/// One rate for every purchase
#[derive(Debug, Clone)]
pub struct FlatRateTax {
    rate: BigDecimal,
}

impl FlatRateTax {
    pub fn new(rate: BigDecimal) -> AppResult<Self> {
        validate_tax_rate(&rate)?;
        Ok(Self { rate: normalize_money(&rate) })
    }
}

impl TaxCalculator for FlatRateTax {
    fn calculate(&self, subtotal: &BigDecimal, currency: &str) -> AppResult<TaxBreakdown> {
        let subtotal = round_for_currency(subtotal, currency)?;
        let tax_amount = round_for_currency(&(&subtotal * &self.rate), currency)?;
        let total = &subtotal + &tax_amount;
        Ok(TaxBreakdown {
            subtotal,
            tax_rate: self.rate.clone(),
            tax_amount,
            total,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub tenant_id: Uuid,
    pub package: CreditPackage,
    pub payment_method_id: Option<String>,
    pub is_auto_recharge: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedCharge {
    pub record: PaymentRecord,
    pub attempt_id: String,
    pub processor_status: PaymentIntentStatus,
    pub tax: TaxBreakdown,
}

/// Starts off-session charges. Credits are applied later by the reconciler.
#[derive(Clone)]
pub struct PaymentInitiator {
    payments: Arc<dyn PaymentRecordRepository>,
    packages: Arc<dyn CreditPackageRepository>,
    payment_methods: PaymentMethodService,
    processor: Arc<dyn PaymentProcessor>,
    tax: Arc<dyn TaxCalculator>,
}

impl PaymentInitiator {
    pub fn new(
        payments: Arc<dyn PaymentRecordRepository>,
        packages: Arc<dyn CreditPackageRepository>,
        payment_methods: PaymentMethodService,
        processor: Arc<dyn PaymentProcessor>,
        tax: Arc<dyn TaxCalculator>,
    ) -> Self {
        Self {
            payments,
            packages,
            payment_methods,
            processor,
            tax,
        }
    }

    /// User-initiated purchase of a catalogue package.
    pub async fn purchase_package(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
        payment_method_id: Option<String>,
    ) -> AppResult<InitiatedCharge> {
        let package = self
            .packages
            .get(package_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound(format!("Credit package {} not found", package_id)))?;

        self.initiate(ChargeRequest {
            tenant_id,
            package,
            payment_method_id,
            is_auto_recharge: false,
        })
        .await
    }

    /// Charge a stored payment method off-session and record the pending payment.
    pub async fn initiate(&self, request: ChargeRequest) -> AppResult<InitiatedCharge> {
        validate_package_price(&request.package.price)?;

        let method = self
            .payment_methods
            .resolve_for_charge(request.tenant_id, request.payment_method_id.as_deref())
            .await?;
        let currency = request.package.currency.to_lowercase();
        let tax = self.tax.calculate(&request.package.price, &currency)?;
        let amount_minor = decimal_to_stripe_cents(&tax.total, &currency)?;

        let attempt_id = Uuid::new_v4().to_string();
        let metadata = HashMap::from([
            (metadata_keys::TENANT_ID.to_string(), request.tenant_id.to_string()),
            (metadata_keys::CREDITS.to_string(), request.package.credits.to_string()),
            (metadata_keys::ATTEMPT_ID.to_string(), attempt_id.clone()),
            (metadata_keys::PACKAGE_ID.to_string(), request.package.id.to_string()),
            (
                metadata_keys::IS_AUTO_RECHARGE.to_string(),
                request.is_auto_recharge.to_string(),
            ),
            (metadata_keys::TAX_RATE.to_string(), tax.tax_rate.to_string()),
        ]);
        let description = if request.is_auto_recharge {
            format!("Auto-recharge: {} credits", request.package.credits)
        } else {
            format!("{} ({} credits)", request.package.name, request.package.credits)
        };
        let charge = OffSessionChargeRequest {
            customer_id: method.customer_id.clone(),
            payment_method_id: method.id.clone(),
            amount_minor,
            currency: currency.clone(),
            description,
            metadata,
            idempotency_key: format!("charge_{}", attempt_id),
        };

        let record_for = |external_payment_id: String| NewPaymentRecord {
            external_payment_id,
            tenant_id: request.tenant_id,
            amount: tax.total.clone(),
            subtotal: tax.subtotal.clone(),
            tax_amount: tax.tax_amount.clone(),
            tax_rate: tax.tax_rate.clone(),
            currency: currency.clone(),
            credits_purchased: request.package.credits,
            package_id: Some(request.package.id),
            is_auto_recharge: request.is_auto_recharge,
        };

        info!(
            "Charging tenant {} {} {} for {} credits (attempt {})",
            request.tenant_id, tax.total, currency, request.package.credits, attempt_id
        );

        let intent = match self.charge_resolving_timeouts(&charge, &attempt_id).await {
            Ok(intent) => intent,
            Err(PaymentProviderError::CardDeclined { message, payment_intent_id }) => {
                warn!(
                    "Charge attempt {} for tenant {} declined: {}",
                    attempt_id, request.tenant_id, message
                );
                if let Some(intent_id) = payment_intent_id {
                    self.payments.create_pending(&record_for(intent_id.clone())).await?;
                    self.payments.mark_failed(&intent_id, &message).await?;
                }
                return Err(AppError::PaymentProvider(format!("Card declined: {}", message)));
            }
            Err(e) => {
                error!(
                    "Charge attempt {} for tenant {} failed: {}",
                    attempt_id, request.tenant_id, e
                );
                return Err(e.into());
            }
        };

        let mut record = match self.payments.create_pending(&record_for(intent.id.clone())).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "Payment {} for tenant {} was created by attempt {} but could not be recorded: {}",
                    intent.id, request.tenant_id, attempt_id, e
                );
                send_payment_processing_alert(&intent.id, request.tenant_id, &attempt_id, &e.to_string());
                return Err(e);
            }
        };
        match intent.status {
            PaymentIntentStatus::Canceled | PaymentIntentStatus::RequiresPaymentMethod => {
                let reason = intent.failure_reason();
                if let Some(updated) = self.payments.mark_failed(&intent.id, &reason).await? {
                    record = updated;
                }
                warn!("Payment {} for tenant {} failed: {}", intent.id, request.tenant_id, reason);
            }
            _ => info!(
                "Payment {} for tenant {} is {:?}; awaiting reconciliation",
                intent.id, request.tenant_id, intent.status
            ),
        }

        Ok(InitiatedCharge {
            record,
            attempt_id,
            processor_status: intent.status,
            tax,
        })
    }

    /// A timed-out create has an unknown outcome. Look the attempt up before
    /// retrying, and retry with the same idempotency key.
    async fn charge_resolving_timeouts(
        &self,
        charge: &OffSessionChargeRequest,
        attempt_id: &str,
    ) -> Result<PaymentIntent, PaymentProviderError> {
        match self.processor.create_off_session_charge(charge).await {
            Err(e) if e.is_timeout() => {
                warn!("Charge attempt {} timed out; checking processor for it", attempt_id);
                if let Some(existing) = self.processor.find_payment_by_attempt(attempt_id).await? {
                    info!("Charge attempt {} found at processor as {}", attempt_id, existing.id);
                    return Ok(existing);
                }
                self.processor.create_off_session_charge(charge).await
            }
            other => other,
        }
    }
}
