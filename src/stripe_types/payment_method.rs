use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub card: Option<PaymentMethodCard>,
    pub customer: Option<String>,
    pub created: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PaymentMethodCard {
    pub brand: String,
    pub exp_month: i64,
    pub exp_year: i64,
    pub last4: String,
}
