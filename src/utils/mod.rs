pub mod admin_alerting;
pub mod financial_validation;
pub mod stripe_currency_utils;
