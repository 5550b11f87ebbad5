pub mod scripted_processor;
pub mod stripe_client;
pub mod webhook_signature;

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::stripe_types::{Customer, PaymentIntent, PaymentMethod};

pub use scripted_processor::{ScriptedCharge, ScriptedProcessor};
pub use stripe_client::StripeClient;
pub use webhook_signature::WebhookVerifier;

/// Errors raised by the payment processor integration
#[derive(Debug, thiserror::Error)]
pub enum PaymentProviderError {
    #[error("Card declined: {message}")]
    CardDeclined {
        message: String,
        /// Intent created by the processor before the decline, when known
        payment_intent_id: Option<String>,
    },
    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        error_type: String,
        message: String,
        code: Option<String>,
    },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PaymentProviderError {
    /// Whether the outcome of the call is unknown to us.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PaymentProviderError::Timeout(_))
    }
}

/// Parameters for a confirmed off-session charge
#[derive(Debug, Clone)]
pub struct OffSessionChargeRequest {
    pub customer_id: String,
    pub payment_method_id: String,
    /// Amount in the smallest currency unit
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
    /// Sent as the Idempotency-Key header; reused on retry
    pub idempotency_key: String,
}

/// Outbound operations against the payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_customer(&self, tenant_id: Uuid) -> Result<Customer, PaymentProviderError>;

    async fn create_off_session_charge(
        &self,
        request: &OffSessionChargeRequest,
    ) -> Result<PaymentIntent, PaymentProviderError>;

    /// Look up a charge by the `attempt_id` we stamped into its metadata.
    async fn find_payment_by_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentProviderError>;

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod, PaymentProviderError>;

    async fn detach_payment_method(&self, payment_method_id: &str)
        -> Result<(), PaymentProviderError>;
}
