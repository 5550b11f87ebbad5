use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Severity levels for admin alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "CRITICAL",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::Low => "LOW",
        }
    }
}

/// Types of admin alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    ReconciliationInconsistency,
    StripeWebhookFailure,
    PaymentProcessingError,
    BillingCycleFailure,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ReconciliationInconsistency => "RECONCILIATION_INCONSISTENCY",
            AlertType::StripeWebhookFailure => "STRIPE_WEBHOOK_FAILURE",
            AlertType::PaymentProcessingError => "PAYMENT_PROCESSING_ERROR",
            AlertType::BillingCycleFailure => "BILLING_CYCLE_FAILURE",
        }
    }
}

/// Admin alert structure
#[derive(Debug, Clone)]
pub struct AdminAlert {
    pub alert_id: Uuid,
    pub timestamp: chrono::DateTime<Utc>,
    pub severity: AlertSeverity,
    pub alert_type: AlertType,
    pub title: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

impl AdminAlert {
    pub fn new(
        severity: AlertSeverity,
        alert_type: AlertType,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            alert_type,
            title: title.into(),
            description: description.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn requires_immediate_attention(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "alert_id": self.alert_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "severity": self.severity.as_str(),
            "alert_type": self.alert_type.as_str(),
            "title": self.title,
            "description": self.description,
            "metadata": self.metadata,
            "requires_immediate_attention": self.requires_immediate_attention(),
        })
    }
}

/// Emit the alert as one structured log line. Log shipping picks these up by prefix.
pub fn send_alert(alert: &AdminAlert) {
    let payload = alert.to_json();
    match alert.severity {
        AlertSeverity::Critical => error!("ADMIN ALERT: {}", payload),
        AlertSeverity::High => warn!("ADMIN ALERT: {}", payload),
        AlertSeverity::Medium | AlertSeverity::Low => info!("ADMIN ALERT: {}", payload),
    }
}

/// A processor charge went through but the ledger could not be brought in line.
pub fn send_reconciliation_alert(
    external_payment_id: &str,
    tenant_id: Option<Uuid>,
    detail: &str,
) -> AdminAlert {
    let mut alert = AdminAlert::new(
        AlertSeverity::Critical,
        AlertType::ReconciliationInconsistency,
        "Payment requires manual reconciliation",
        format!(
            "Payment {} was charged by the processor but could not be credited: {}",
            external_payment_id, detail
        ),
    )
    .with_metadata("external_payment_id", external_payment_id)
    .with_metadata("requires_manual_intervention", "true");
    if let Some(tenant_id) = tenant_id {
        alert = alert.with_metadata("tenant_id", tenant_id.to_string());
    }
    send_alert(&alert);
    alert
}

/// A charge went through at the processor but its local record was not written.
/// The webhook rebuilds the record from charge metadata; this flags the gap until then.
pub fn send_payment_processing_alert(
    external_payment_id: &str,
    tenant_id: Uuid,
    attempt_id: &str,
    detail: &str,
) -> AdminAlert {
    let alert = AdminAlert::new(
        AlertSeverity::High,
        AlertType::PaymentProcessingError,
        "Charged payment has no local record",
        format!(
            "Payment {} (attempt {}) for tenant {} was created but not recorded: {}",
            external_payment_id, attempt_id, tenant_id, detail
        ),
    )
    .with_metadata("external_payment_id", external_payment_id)
    .with_metadata("attempt_id", attempt_id)
    .with_metadata("tenant_id", tenant_id.to_string());
    send_alert(&alert);
    alert
}

pub fn send_stripe_webhook_failure_alert(event_id: &str, event_type: &str, error_message: &str) {
    let alert = AdminAlert::new(
        AlertSeverity::High,
        AlertType::StripeWebhookFailure,
        "Stripe Webhook Processing Failed",
        format!(
            "Failed to process Stripe webhook event. Event ID: {}, Event Type: {}, Error: {}",
            event_id, event_type, error_message
        ),
    )
    .with_metadata("webhook_event_id", event_id)
    .with_metadata("event_type", event_type)
    .with_metadata("error_message", error_message);
    send_alert(&alert);
}

pub fn send_billing_cycle_failure_alert(failures: usize, processed: usize, first_error: &str) {
    let alert = AdminAlert::new(
        AlertSeverity::High,
        AlertType::BillingCycleFailure,
        "Billing cycle finished with failures",
        format!(
            "{} of {} subscriptions failed. First error: {}",
            failures, processed, first_error
        ),
    )
    .with_metadata("failures", failures.to_string())
    .with_metadata("processed", processed.to_string());
    send_alert(&alert);
}
