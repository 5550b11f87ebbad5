use actix_web::{HttpResponse, delete, get, post, web};
use log::info;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::AppState;
use crate::models::api::{AttachPaymentMethodRequest, PurchaseRequest};

/// Buy a credit package with a stored payment method. Credits land when the
/// processor confirms the payment.
#[post("/{tenant_id}/purchases")]
pub async fn purchase_credits(
    path: web::Path<Uuid>,
    request: web::Json<PurchaseRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let request = request.into_inner();

    let charge = app_state
        .initiator
        .purchase_package(tenant_id, request.package_id, request.payment_method_id)
        .await?;

    info!(
        "Purchase of package {} started for tenant {} as payment {}",
        request.package_id, tenant_id, charge.record.external_payment_id
    );
    Ok(HttpResponse::Accepted().json(charge))
}

#[get("/{tenant_id}/payment-methods")]
pub async fn list_payment_methods(
    path: web::Path<Uuid>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let methods = app_state.payment_methods.list(tenant_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "tenantId": tenant_id,
        "paymentMethods": methods,
    })))
}

#[post("/{tenant_id}/payment-methods")]
pub async fn attach_payment_method(
    path: web::Path<Uuid>,
    request: web::Json<AttachPaymentMethodRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let method = app_state
        .payment_methods
        .attach(tenant_id, &request.payment_method_id, request.make_default)
        .await?;

    Ok(HttpResponse::Created().json(method))
}

#[delete("/{tenant_id}/payment-methods/{payment_method_id}")]
pub async fn detach_payment_method(
    path: web::Path<(Uuid, String)>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, payment_method_id) = path.into_inner();
    app_state
        .payment_methods
        .detach(tenant_id, &payment_method_id)
        .await?;

    Ok(HttpResponse::NoContent().finish())
}
