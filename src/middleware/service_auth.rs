use actix_web::{Error, dev::ServiceRequest, web};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use log::{debug, error, warn};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::models::AppState;

/// Bearer check for the `/api` scope: internal services present the shared service token.
pub async fn service_token_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_bearer(req, credentials, |state| &state.settings.auth.service_api_token, "service token")
}

/// Bearer check for the scheduler trigger.
pub async fn cron_secret_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_bearer(req, credentials, |state| &state.settings.cron.secret, "cron secret")
}

fn validate_bearer(
    req: ServiceRequest,
    credentials: BearerAuth,
    expected: impl Fn(&AppState) -> &String,
    label: &str,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let path = req.path().to_string();

    let Some(state) = req.app_data::<web::Data<AppState>>() else {
        error!("Application state missing while authenticating {}", path);
        return Err((
            AppError::Internal("Authentication is not configured".to_string()).into(),
            req,
        ));
    };

    let expected = expected(state.get_ref());
    if !tokens_match(credentials.token(), expected) {
        warn!("Rejected request to {}: invalid {}", path, label);
        return Err((
            AppError::Unauthorized(format!("Invalid {}", label)).into(),
            req,
        ));
    }

    debug!("Authenticated request to {} with {}", path, label);
    Ok(req)
}

fn tokens_match(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
