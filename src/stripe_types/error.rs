use serde::{Deserialize, Serialize};

/// Error envelope returned by the Stripe API on non-2xx responses
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StripeErrorResponse {
    pub error: StripeApiError,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StripeApiError {
    #[serde(rename = "type")]
    pub type_: String,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
    pub param: Option<String>,
    /// Present on card errors raised while confirming an intent
    pub payment_intent: Option<ErrorPaymentIntent>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ErrorPaymentIntent {
    pub id: String,
}
