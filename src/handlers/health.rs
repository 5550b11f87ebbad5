use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;

use crate::models::AppState;
use crate::services::notification_queue::NotificationStatsSnapshot;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    version: String,
    notifications: NotificationStatsSnapshot,
}

pub async fn health_check(app_state: web::Data<AppState>) -> impl Responder {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        notifications: app_state.notifications.stats(),
    };

    HttpResponse::Ok().json(response)
}
