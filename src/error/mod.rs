use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::error::Error as StdError;
use sqlx::error::Error as SqlxError;

use crate::clients::PaymentProviderError;

#[derive(Debug)]
pub enum AppError {
    Database(String),
    Internal(String),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Configuration(String),
    Validation(String),
    External(String),
    InvalidArgument(String),
    Serialization(String),
    /// A debit was rejected before any mutation
    InsufficientCredits { required: i64, available: i64 },
    /// Declined card, processor timeout, invalid payment method
    PaymentProvider(String),
    /// The processor charged but the ledger could not be brought in line
    ReconciliationInconsistency(String),
    /// Some items of a batch failed; the batch itself ran to completion
    SchedulerPartialFailure(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    available: Option<i64>,
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration_error",
            AppError::Validation(_) => "validation_error",
            AppError::External(_) => "external_service_error",
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::Serialization(_) => "serialization_error",
            AppError::InsufficientCredits { .. } => "insufficient_credits",
            AppError::PaymentProvider(_) => "payment_provider_error",
            AppError::ReconciliationInconsistency(_) => "reconciliation_inconsistency",
            AppError::SchedulerPartialFailure(_) => "scheduler_partial_failure",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Unauthorized(e) => write!(f, "Unauthorized: {}", e),
            AppError::NotFound(e) => write!(f, "Not found: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Validation(e) => write!(f, "Validation error: {}", e),
            AppError::External(e) => write!(f, "External service error: {}", e),
            AppError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::InsufficientCredits { required, available } => write!(
                f,
                "Insufficient credits. Required: {}, Available: {}",
                required, available
            ),
            AppError::PaymentProvider(e) => write!(f, "Payment provider error: {}", e),
            AppError::ReconciliationInconsistency(e) => {
                write!(f, "Reconciliation inconsistency: {}", e)
            }
            AppError::SchedulerPartialFailure(e) => write!(f, "Scheduler partial failure: {}", e),
        }
    }
}

impl StdError for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let (required, available) = match self {
            AppError::InsufficientCredits { required, available } => {
                (Some(*required), Some(*available))
            }
            _ => (None, None),
        };

        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: self.to_string(),
            error_type: self.error_type().to_string(),
            required,
            available,
        };

        HttpResponse::build(status_code).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::External(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::PaymentProvider(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::ReconciliationInconsistency(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SchedulerPartialFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::NotFound("Record not found".to_string()),
            _ => AppError::Database(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Serialization(format!("JSON deserialization/serialization error: {}", error))
    }
}

impl From<bigdecimal::ParseBigDecimalError> for AppError {
    fn from(error: bigdecimal::ParseBigDecimalError) -> Self {
        AppError::Validation(format!("Invalid decimal value: {}", error))
    }
}

impl From<PaymentProviderError> for AppError {
    fn from(error: PaymentProviderError) -> Self {
        match error {
            PaymentProviderError::WebhookVerification(msg) => {
                AppError::BadRequest(format!("Webhook verification failed: {}", msg))
            }
            PaymentProviderError::Configuration(msg) => {
                AppError::Configuration(format!("Payment processor configuration error: {}", msg))
            }
            PaymentProviderError::Timeout(msg) => {
                AppError::External(format!("Payment processor timed out: {}", msg))
            }
            other => AppError::PaymentProvider(other.to_string()),
        }
    }
}

// Define AppResult type alias for Result<T, AppError>
pub type AppResult<T> = Result<T, AppError>;
