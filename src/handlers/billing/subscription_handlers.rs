use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::AppState;
use crate::models::billing::NewMeteredSubscription;

#[get("/{tenant_id}/subscriptions")]
pub async fn list_subscriptions(
    path: web::Path<Uuid>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let subscriptions = app_state.billing.list_subscriptions(tenant_id).await?;

    Ok(HttpResponse::Ok().json(subscriptions))
}

/// Register a recurring charge for a resource such as a rented phone number
#[post("/{tenant_id}/subscriptions")]
pub async fn register_subscription(
    path: web::Path<Uuid>,
    request: web::Json<NewMeteredSubscription>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let subscription = app_state
        .billing
        .register_subscription(tenant_id, &request.into_inner(), Utc::now())
        .await?;

    Ok(HttpResponse::Created().json(subscription))
}
