use actix_web::{HttpResponse, get, post, put, web};
use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::AppState;
use crate::models::billing::AutoRechargeSettingsUpdate;
use crate::services::RechargeDecision;

/// Get auto-recharge settings for the tenant
#[get("/{tenant_id}/auto-recharge")]
pub async fn get_auto_recharge_settings(
    path: web::Path<Uuid>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let settings = app_state
        .auto_recharge
        .get_settings(tenant_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Auto-recharge is not configured for tenant {}", tenant_id))
        })?;

    Ok(HttpResponse::Ok().json(settings))
}

/// Create or replace auto-recharge settings for the tenant
#[put("/{tenant_id}/auto-recharge")]
pub async fn update_auto_recharge_settings(
    path: web::Path<Uuid>,
    request: web::Json<AutoRechargeSettingsUpdate>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let settings = app_state
        .auto_recharge
        .update_settings(tenant_id, &request.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(settings))
}

/// Start a recharge now regardless of the threshold
#[post("/{tenant_id}/auto-recharge/trigger")]
pub async fn trigger_auto_recharge(
    path: web::Path<Uuid>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let decision = app_state.auto_recharge.trigger_now(tenant_id, Utc::now()).await?;

    info!("Manual auto-recharge trigger for tenant {}: {:?}", tenant_id, decision);
    match decision {
        RechargeDecision::Initiated(_) => Ok(HttpResponse::Accepted().json(decision)),
        RechargeDecision::CoolingDown { .. } | RechargeDecision::ClaimLost => {
            Ok(HttpResponse::Conflict().json(decision))
        }
        _ => Ok(HttpResponse::Ok().json(decision)),
    }
}
