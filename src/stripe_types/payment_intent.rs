use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::stripe_types::{Expandable, PaymentMethod};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    /// Amount in the smallest currency unit
    pub amount: i64,
    pub amount_received: Option<i64>,
    pub currency: String,
    pub customer: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub status: PaymentIntentStatus,
    pub created: i64,
    pub payment_method: Option<Expandable<PaymentMethod>>,
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LastPaymentError {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}

impl PaymentIntent {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn payment_method_id(&self) -> Option<&str> {
        self.payment_method.as_ref().map(|pm| pm.id())
    }

    pub fn failure_reason(&self) -> String {
        self.last_payment_error
            .as_ref()
            .and_then(|e| {
                e.message
                    .clone()
                    .or_else(|| e.decline_code.clone())
                    .or_else(|| e.code.clone())
            })
            .unwrap_or_else(|| "Payment failed".to_string())
    }
}
