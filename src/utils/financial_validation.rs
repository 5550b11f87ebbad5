//! Validation helpers for credit amounts and money values
//!
//! Credits are whole signed integers. Money (prices, tax) is `BigDecimal`
//! and is normalized to a fixed scale before it is persisted.

use bigdecimal::{BigDecimal, RoundingMode, Signed, Zero};

use crate::error::AppError;
use crate::models::AutoRechargeSettingsUpdate;

/// Scale used for stored tax rates and intermediate money values
pub const MAX_DECIMAL_PLACES: i64 = 6;

/// Largest single credit movement accepted from an API caller
pub const MAX_CREDIT_AMOUNT: i64 = 10_000_000;

/// Normalizes to six decimal places with banker's rounding.
pub fn normalize_money(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(MAX_DECIMAL_PLACES, RoundingMode::HalfEven)
}

/// Non-zero, within bounds. Sign is the caller's business.
pub fn validate_credit_amount(amount: i64, operation_name: &str) -> Result<(), AppError> {
    if amount == 0 {
        return Err(AppError::Validation(format!(
            "{} amount must be non-zero",
            operation_name
        )));
    }
    if amount.unsigned_abs() > MAX_CREDIT_AMOUNT as u64 {
        return Err(AppError::Validation(format!(
            "{} amount {} exceeds the maximum of {}",
            operation_name, amount, MAX_CREDIT_AMOUNT
        )));
    }
    Ok(())
}

/// Tax rate must be a fraction in `[0, 1)`.
pub fn validate_tax_rate(rate: &BigDecimal) -> Result<(), AppError> {
    if rate.is_negative() || rate >= &BigDecimal::from(1) {
        return Err(AppError::Configuration(format!(
            "Tax rate must be between 0 and 1, got {}",
            rate
        )));
    }
    if rate != &normalize_money(rate) {
        return Err(AppError::Configuration(format!(
            "Tax rate cannot exceed {} decimal places: {}",
            MAX_DECIMAL_PLACES, rate
        )));
    }
    Ok(())
}

pub fn validate_package_price(price: &BigDecimal) -> Result<(), AppError> {
    if price.is_negative() || price.is_zero() {
        return Err(AppError::Validation(format!(
            "Package price must be greater than zero, got {}",
            price
        )));
    }
    Ok(())
}

/// Shape checks for auto-recharge settings. Payment method ownership is checked by the caller.
pub fn validate_auto_recharge_settings(update: &AutoRechargeSettingsUpdate) -> Result<(), AppError> {
    if update.minimum_balance < 0 {
        return Err(AppError::Validation(format!(
            "Minimum balance cannot be negative: {}",
            update.minimum_balance
        )));
    }
    if update.recharge_amount <= 0 {
        return Err(AppError::Validation(format!(
            "Recharge amount must be greater than zero: {}",
            update.recharge_amount
        )));
    }
    if update.recharge_amount > MAX_CREDIT_AMOUNT || update.minimum_balance > MAX_CREDIT_AMOUNT {
        return Err(AppError::Validation(format!(
            "Auto-recharge amounts cannot exceed {} credits",
            MAX_CREDIT_AMOUNT
        )));
    }
    if let Some(pm) = &update.payment_method_id {
        if pm.trim().is_empty() {
            return Err(AppError::Validation(
                "Payment method id must not be blank".to_string(),
            ));
        }
    }
    Ok(())
}
