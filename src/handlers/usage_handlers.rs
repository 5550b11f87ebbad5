use actix_web::{HttpResponse, web};
use chrono::Utc;
use log::{debug, info, warn};

use crate::error::AppError;
use crate::models::AppState;
use crate::models::api::{
    AuthorizeUsageRequest, LedgerEntryResponse, UsageCallbackRequest, UsageSettlementResponse,
};
use crate::services::RechargeDecision;

/// Balance gate before a call or message starts. Writes nothing.
pub async fn authorize_usage(
    payload: web::Json<AuthorizeUsageRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let request = payload.into_inner();
    let authorization = app_state
        .authorizer
        .pre_authorize(request.tenant_id, request.kind, request.estimated_cost)
        .await?;

    Ok(HttpResponse::Ok().json(authorization))
}

/// Provider completion callback. Settles the usage, then gives auto-recharge a look.
pub async fn usage_callback(
    payload: web::Json<UsageCallbackRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let request = payload.into_inner();
    if request.reference_id.trim().is_empty() {
        return Err(AppError::Validation("referenceId is required".to_string()));
    }

    let outcome = app_state
        .authorizer
        .settle_usage(request.tenant_id, &request.usage, &request.reference_id)
        .await?;

    let Some(outcome) = outcome else {
        return Ok(HttpResponse::Ok().json(UsageSettlementResponse {
            billed: false,
            entry: None,
        }));
    };

    // Recharge problems never fail the settlement that is already recorded
    match app_state.auto_recharge.evaluate(request.tenant_id, Utc::now()).await {
        Ok(RechargeDecision::Initiated(charge)) => info!(
            "Auto-recharge started for tenant {} after usage {} (payment {})",
            request.tenant_id, request.reference_id, charge.record.external_payment_id
        ),
        Ok(decision) => debug!(
            "Auto-recharge for tenant {} after usage: {:?}",
            request.tenant_id, decision
        ),
        Err(e) => warn!(
            "Auto-recharge evaluation failed for tenant {}: {}",
            request.tenant_id, e
        ),
    }

    Ok(HttpResponse::Ok().json(UsageSettlementResponse {
        billed: true,
        entry: Some(LedgerEntryResponse::from(outcome)),
    }))
}
