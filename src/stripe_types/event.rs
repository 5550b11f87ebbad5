use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: i64,
    pub data: EventData,
    #[serde(default)]
    pub livemode: bool,
    pub api_version: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        EventType::from_type_str(&self.type_)
    }

    /// Deserialize `data.object` into the expected Stripe object.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}

/// Webhook event types the reconciler acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PaymentIntentSucceeded,
    PaymentIntentPaymentFailed,
    CheckoutSessionCompleted,
    Other(String),
}

impl EventType {
    pub fn from_type_str(s: &str) -> Self {
        match s {
            "payment_intent.succeeded" => EventType::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => EventType::PaymentIntentPaymentFailed,
            "checkout.session.completed" => EventType::CheckoutSessionCompleted,
            other => EventType::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stripe_types::PaymentIntent;

    #[test]
    fn parses_payment_intent_event() {
        let raw = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1700000000,
            "livemode": false,
            "api_version": "2024-06-20",
            "data": { "object": {
                "id": "pi_1",
                "amount": 1000,
                "currency": "usd",
                "status": "succeeded",
                "created": 1700000000,
                "metadata": { "tenant_id": "t1" }
            }}
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type(), EventType::PaymentIntentSucceeded);
        let intent: PaymentIntent = event.object().unwrap();
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.metadata_value("tenant_id"), Some("t1"));
    }

    #[test]
    fn unknown_types_are_preserved() {
        assert_eq!(
            EventType::from_type_str("invoice.paid"),
            EventType::Other("invoice.paid".to_string())
        );
    }
}
