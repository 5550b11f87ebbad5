use actix_web::{HttpResponse, web};
use log::info;
use uuid::Uuid;

use crate::db::repositories::CreditPackageRepository;
use crate::error::AppError;
use crate::models::AppState;
use crate::models::api::{AdjustmentRequest, BalanceResponse, LedgerEntryResponse, PaginationQuery};

const DEFAULT_PAGE_SIZE: i64 = 50;

/// Get tenant's credit balance
pub async fn get_balance(
    path: web::Path<Uuid>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let balance = app_state.ledger.get_balance(tenant_id).await?;

    Ok(HttpResponse::Ok().json(BalanceResponse { tenant_id, balance }))
}

/// Get credit transaction history, newest first
pub async fn get_transactions(
    path: web::Path<Uuid>,
    query: web::Query<PaginationQuery>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let history = app_state.ledger.history(tenant_id, limit, offset).await?;
    Ok(HttpResponse::Ok().json(history))
}

/// Administrative balance adjustment
pub async fn create_adjustment(
    path: web::Path<Uuid>,
    payload: web::Json<AdjustmentRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let request = payload.into_inner();
    info!(
        "Adjustment of {} credits requested for tenant {}: {}",
        request.amount, tenant_id, request.reason
    );

    let outcome = app_state
        .ledger
        .adjust_balance(
            tenant_id,
            request.amount,
            &request.reason,
            request.reference_id.as_deref(),
            request.override_balance,
        )
        .await?;

    let response = LedgerEntryResponse::from(outcome);
    if response.duplicate {
        Ok(HttpResponse::Ok().json(response))
    } else {
        Ok(HttpResponse::Created().json(response))
    }
}

/// Active credit packages, smallest first
pub async fn list_credit_packages(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let packages = app_state.repositories.packages.list_active().await?;
    Ok(HttpResponse::Ok().json(packages))
}
