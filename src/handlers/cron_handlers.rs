use actix_web::{HttpResponse, web};
use chrono::Utc;
use log::info;

use crate::error::AppError;
use crate::models::AppState;
use crate::services::scheduled_jobs::run_billing_pass;

/// External scheduler trigger: billing cycle plus auto-recharge sweep.
/// Partial failures still return the full report, with a 500 status.
pub async fn run_billing_cycle(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    info!("Billing pass triggered by external scheduler");
    let report = run_billing_pass(&app_state.billing, &app_state.auto_recharge, Utc::now()).await?;

    if report.complete {
        Ok(HttpResponse::Ok().json(report))
    } else {
        Ok(HttpResponse::InternalServerError().json(report))
    }
}
