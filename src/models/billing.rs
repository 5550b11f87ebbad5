use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Auto-recharge models
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AutoRechargeSettings {
    pub tenant_id: Uuid,
    pub enabled: bool,
    pub minimum_balance: i64,
    pub recharge_amount: i64,
    pub payment_method_id: Option<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutoRechargeSettings {
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        match self.last_triggered_at {
            Some(last) => now - last > cooldown,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoRechargeSettingsUpdate {
    pub enabled: bool,
    pub minimum_balance: i64,
    pub recharge_amount: i64,
    pub payment_method_id: Option<String>,
}

// Payment records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: Uuid,
    pub external_payment_id: String,
    pub tenant_id: Uuid,
    /// Total charged including tax, in currency units
    pub amount: BigDecimal,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub currency: String,
    pub credits_purchased: i64,
    pub package_id: Option<Uuid>,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub is_auto_recharge: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub external_payment_id: String,
    pub tenant_id: Uuid,
    pub amount: BigDecimal,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub currency: String,
    pub credits_purchased: i64,
    pub package_id: Option<Uuid>,
    pub is_auto_recharge: bool,
}

impl NewPaymentRecord {
    pub fn into_record(self, status: PaymentStatus, now: DateTime<Utc>) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            external_payment_id: self.external_payment_id,
            tenant_id: self.tenant_id,
            amount: self.amount,
            subtotal: self.subtotal,
            tax_amount: self.tax_amount,
            tax_rate: self.tax_rate,
            currency: self.currency,
            credits_purchased: self.credits_purchased,
            package_id: self.package_id,
            status,
            failure_reason: None,
            is_auto_recharge: self.is_auto_recharge,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<&PaymentRecord> for NewPaymentRecord {
    fn from(record: &PaymentRecord) -> Self {
        Self {
            external_payment_id: record.external_payment_id.clone(),
            tenant_id: record.tenant_id,
            amount: record.amount.clone(),
            subtotal: record.subtotal.clone(),
            tax_amount: record.tax_amount.clone(),
            tax_rate: record.tax_rate.clone(),
            currency: record.currency.clone(),
            credits_purchased: record.credits_purchased,
            package_id: record.package_id,
            is_auto_recharge: record.is_auto_recharge,
        }
    }
}

// Payment methods
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: String, // processor payment method token
    pub tenant_id: Uuid,
    pub customer_id: String,
    pub card_brand: Option<String>,
    pub card_last_four: Option<String>,
    pub card_exp_month: Option<i32>,
    pub card_exp_year: Option<i32>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BillingCustomer {
    pub tenant_id: Uuid,
    pub customer_id: String,
    pub created_at: DateTime<Utc>,
}

// Recurring metered subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MeteredSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub resource: String,
    pub monthly_cost: i64,
    pub next_billing_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub suspended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeteredSubscription {
    /// Ledger reference for one billing period of this subscription.
    pub fn period_reference(&self) -> String {
        format!(
            "sub:{}:{}",
            self.id,
            self.next_billing_date.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMeteredSubscription {
    pub resource: String,
    pub monthly_cost: i64,
    /// Defaults to now; the first period is billed on the next cycle run
    pub first_billing_date: Option<DateTime<Utc>>,
}

// Credit packages
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditPackage {
    pub id: Uuid,
    pub name: String,
    pub credits: i64,
    pub price: BigDecimal,
    pub currency: String,
    pub is_active: bool,
}

// Manual review queue
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationIssue {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub external_payment_id: String,
    pub kind: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewReconciliationIssue {
    pub tenant_id: Option<Uuid>,
    pub external_payment_id: String,
    pub kind: String,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings(last: Option<DateTime<Utc>>) -> AutoRechargeSettings {
        let now = Utc::now();
        AutoRechargeSettings {
            tenant_id: Uuid::new_v4(),
            enabled: true,
            minimum_balance: 100,
            recharge_amount: 1000,
            payment_method_id: None,
            last_triggered_at: last,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cooldown_is_strictly_greater() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let s = settings(Some(last));
        let hour = chrono::Duration::hours(1);
        assert!(!s.cooldown_elapsed(last + hour, hour));
        assert!(s.cooldown_elapsed(last + hour + chrono::Duration::seconds(1), hour));
        assert!(settings(None).cooldown_elapsed(last, hour));
    }

    #[test]
    fn period_reference_is_stable_per_billing_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let sub = MeteredSubscription {
            id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            resource: "+15550100".to_string(),
            monthly_cost: 300,
            next_billing_date: now,
            status: SubscriptionStatus::Active,
            suspended_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            sub.period_reference(),
            "sub:00000000-0000-0000-0000-000000000000:2024-03-01T00:00:00Z"
        );
    }
}
