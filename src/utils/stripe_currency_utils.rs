use bigdecimal::{BigDecimal, RoundingMode, Signed, ToPrimitive};

use crate::error::AppError;

/// Utilities for moving money between Stripe's integer minor units and the
/// decimal amounts stored on payment records.
///
/// Stripe amounts are always integers in the currency's smallest unit. Zero-decimal
/// currencies (JPY, KRW, ...) are not multiplied by 100.

/// Convert a Stripe amount in the smallest currency unit to a decimal amount.
pub fn stripe_cents_to_decimal(stripe_amount_cents: i64, currency: &str) -> Result<BigDecimal, AppError> {
    if currency.is_empty() {
        return Err(AppError::InvalidArgument("Currency code cannot be empty".to_string()));
    }

    let amount = BigDecimal::from(stripe_amount_cents);
    if is_zero_decimal_currency(currency) {
        Ok(amount)
    } else {
        Ok(amount / BigDecimal::from(100))
    }
}

/// Convert a decimal amount to Stripe's smallest currency unit.
pub fn decimal_to_stripe_cents(amount: &BigDecimal, currency: &str) -> Result<i64, AppError> {
    if currency.is_empty() {
        return Err(AppError::InvalidArgument("Currency code cannot be empty".to_string()));
    }

    if amount.is_negative() {
        return Err(AppError::InvalidArgument(format!(
            "Amount cannot be negative: {}",
            amount
        )));
    }

    let rounded = round_for_currency(amount, currency)?;
    let stripe_amount = if is_zero_decimal_currency(currency) {
        rounded
    } else {
        rounded * BigDecimal::from(100)
    };

    stripe_amount.to_i64().ok_or_else(|| {
        AppError::InvalidArgument(format!(
            "Amount {} {} cannot be converted to Stripe integer format",
            amount, currency
        ))
    })
}

/// Zero-decimal currencies per https://docs.stripe.com/currencies#zero-decimal
fn is_zero_decimal_currency(currency: &str) -> bool {
    matches!(
        currency.to_uppercase().as_str(),
        "BIF" | "CLP" | "DJF" | "GNF" | "JPY" | "KMF" | "KRW" | "MGA" | "PYG" | "RWF" | "UGX"
            | "VND" | "VUV" | "XAF" | "XOF" | "XPF"
    )
}

/// Round half-up to the precision the currency is charged in.
pub fn round_for_currency(amount: &BigDecimal, currency: &str) -> Result<BigDecimal, AppError> {
    if currency.is_empty() {
        return Err(AppError::InvalidArgument("Currency code cannot be empty".to_string()));
    }

    if is_zero_decimal_currency(currency) {
        Ok(amount.with_scale_round(0, RoundingMode::HalfUp))
    } else {
        Ok(amount.with_scale_round(2, RoundingMode::HalfUp))
    }
}

/// Check that a processor-reported amount matches the amount we recorded.
pub fn validate_stripe_amount_matches(
    stripe_amount_cents: i64,
    local_amount: &BigDecimal,
    currency: &str,
) -> Result<(), AppError> {
    if stripe_amount_cents < 0 {
        return Err(AppError::InvalidArgument(format!(
            "Stripe amount cannot be negative: {}",
            stripe_amount_cents
        )));
    }

    let converted_local = decimal_to_stripe_cents(local_amount, currency)?;
    if stripe_amount_cents != converted_local {
        return Err(AppError::InvalidArgument(format!(
            "Amount mismatch for {}: Stripe {} cents, local {} (converts to {} cents)",
            currency, stripe_amount_cents, local_amount, converted_local
        )));
    }

    Ok(())
}
