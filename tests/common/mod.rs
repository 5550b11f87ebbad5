#![allow(dead_code)]

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::{StatusCode, header};
use actix_web::test::{self, TestRequest};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use credit_ledger_server::clients::ScriptedProcessor;
use credit_ledger_server::db::{MemoryStore, Repositories};
use credit_ledger_server::services::{LogNotificationDispatcher, NotificationQueue};
use credit_ledger_server::{AppSettings, AppState};

pub const SERVICE_TOKEN: &str = "svc-test-token";
pub const CRON_SECRET: &str = "cron-test-secret";
pub const PAYMENT_METHOD: &str = "pm_card_visa";

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub processor: Arc<ScriptedProcessor>,
}

pub fn settings() -> AppSettings {
    let vars = HashMap::from([
        ("STORE_BACKEND", "memory"),
        ("SERVICE_API_TOKEN", SERVICE_TOKEN),
        ("STRIPE_SECRET_KEY", "sk_test_local"),
        ("STRIPE_WEBHOOK_SECRET", "whsec_test_local"),
        ("CRON_SECRET", CRON_SECRET),
        ("AUTO_RECHARGE_COOLDOWN_MINUTES", "60"),
        ("BILLING_PERIOD_DAYS", "30"),
        ("SUSPENSION_RETRY_DAYS", "7"),
        ("VOICE_CREDITS_PER_MINUTE", "10"),
        ("SMS_CREDITS_PER_SEGMENT", "5"),
    ]);
    AppSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string())).expect("test settings")
}

/// In-memory store, scripted processor and a log-only notification queue.
/// Must be called inside a runtime.
pub fn context() -> TestContext {
    context_with(|repositories, _| repositories)
}

/// Like `context`, with a chance to swap individual repositories.
pub fn context_with(
    customize: impl FnOnce(Repositories, &Arc<MemoryStore>) -> Repositories,
) -> TestContext {
    let store = Arc::new(MemoryStore::with_default_packages());
    let processor = Arc::new(ScriptedProcessor::new());
    let (notifications, _worker) = NotificationQueue::start(Arc::new(LogNotificationDispatcher), 64, 1);
    let repositories = customize(Repositories::memory(store.clone()), &store);
    let state = AppState::build(settings(), repositories, processor.clone(), notifications)
        .expect("app state");

    TestContext { state, store, processor }
}

pub fn api_get(uri: &str) -> TestRequest {
    TestRequest::get()
        .uri(uri)
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", SERVICE_TOKEN)))
}

pub fn api_post(uri: &str, body: Value) -> TestRequest {
    TestRequest::post()
        .uri(uri)
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", SERVICE_TOKEN)))
        .set_json(body)
}

pub fn api_put(uri: &str, body: Value) -> TestRequest {
    TestRequest::put()
        .uri(uri)
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", SERVICE_TOKEN)))
        .set_json(body)
}

pub fn cron_run() -> TestRequest {
    TestRequest::post()
        .uri("/internal/cron/billing")
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", CRON_SECRET)))
}

/// A webhook delivery signed the way Stripe signs it
pub fn signed_webhook(state: &AppState, event: &Value) -> TestRequest {
    let payload = event.to_string();
    let signature = state
        .webhook_verifier
        .signature_header(&payload, Utc::now().timestamp())
        .expect("signature");
    TestRequest::post()
        .uri("/webhooks/stripe")
        .insert_header(("Stripe-Signature", signature))
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload(payload)
}

pub fn event(event_id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "livemode": false,
        "data": { "object": object }
    })
}

/// Send a request and decode the JSON body, `Value::Null` when empty
pub async fn send<S, R, B>(app: &S, req: R) -> (StatusCode, Value)
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    let status = resp.status();
    let bytes = test::read_body(resp).await;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}
