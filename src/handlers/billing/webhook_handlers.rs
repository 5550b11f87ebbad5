use actix_web::{HttpRequest, HttpResponse, post, web};
use log::{error, info};

use crate::error::AppError;
use crate::models::AppState;
use crate::services::WebhookDisposition;

/// Stripe webhook endpoint. The signature is verified over the raw body before anything is parsed.
#[post("/stripe")]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let stripe_signature = req
        .headers()
        .get("Stripe-Signature")
        .ok_or_else(|| {
            error!("Missing Stripe-Signature header in webhook request");
            AppError::BadRequest("Missing Stripe-Signature header".to_string())
        })?
        .to_str()
        .map_err(|e| {
            error!("Invalid Stripe-Signature header encoding: {}", e);
            AppError::BadRequest("Invalid Stripe-Signature header".to_string())
        })?;

    let body_str = std::str::from_utf8(&body).map_err(|e| {
        error!("Invalid UTF-8 in webhook body: {}", e);
        AppError::BadRequest("Invalid webhook body encoding".to_string())
    })?;

    let event = app_state
        .webhook_verifier
        .construct_event(body_str, stripe_signature)
        .map_err(|e| {
            error!("Stripe webhook signature verification failed: {}", e);
            AppError::BadRequest(format!("Invalid webhook signature: {}", e))
        })?;

    info!("Verified Stripe webhook event {} (type: {})", event.id, event.type_);

    let disposition = app_state.reconciler.process_webhook(&event).await?;
    let body = serde_json::json!({
        "received": true,
        "eventId": event.id,
        "status": disposition.label(),
    });

    match disposition {
        // Stripe redelivers on non-2xx; the other worker's claim will expire if it dies
        WebhookDisposition::InProgress => Ok(HttpResponse::Conflict().json(body)),
        _ => Ok(HttpResponse::Ok().json(body)),
    }
}
