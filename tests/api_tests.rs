mod common;

use actix_web::http::{StatusCode, header};
use actix_web::test::{self, TestRequest};
use actix_web::{App, web};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use common::{
    PAYMENT_METHOD, SERVICE_TOKEN, api_get, api_post, api_put, context, context_with, cron_run, event,
    send, signed_webhook,
};
use credit_ledger_server::db::{
    ChargeTerms, MemoryStore, SubscriptionChargeOutcome, SubscriptionRepository,
};
use credit_ledger_server::error::AppResult;
use credit_ledger_server::models::{MeteredSubscription, NewMeteredSubscription};
use credit_ledger_server::routes::configure_app;
use credit_ledger_server::AppError;

macro_rules! init_app {
    ($ctx:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($ctx.state.clone()))
                .configure(configure_app),
        )
        .await
    };
}

const UNBILLABLE_RESOURCE: &str = "+15550199";

/// Memory subscriptions where charging one resource always fails
struct UnbillableResource(Arc<MemoryStore>);

#[async_trait]
impl SubscriptionRepository for UnbillableResource {
    async fn create(
        &self,
        tenant_id: Uuid,
        new: &NewMeteredSubscription,
        now: DateTime<Utc>,
    ) -> AppResult<MeteredSubscription> {
        SubscriptionRepository::create(self.0.as_ref(), tenant_id, new, now).await
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<MeteredSubscription>> {
        SubscriptionRepository::get(self.0.as_ref(), id).await
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>> {
        SubscriptionRepository::list_for_tenant(self.0.as_ref(), tenant_id).await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> AppResult<Vec<MeteredSubscription>> {
        SubscriptionRepository::list_due(self.0.as_ref(), now).await
    }

    async fn list_suspended(&self, tenant_id: Uuid) -> AppResult<Vec<MeteredSubscription>> {
        SubscriptionRepository::list_suspended(self.0.as_ref(), tenant_id).await
    }

    async fn charge_or_suspend(
        &self,
        expected: &MeteredSubscription,
        terms: &ChargeTerms,
    ) -> AppResult<SubscriptionChargeOutcome> {
        if expected.resource == UNBILLABLE_RESOURCE {
            return Err(AppError::Database("could not serialize access".to_string()));
        }
        SubscriptionRepository::charge_or_suspend(self.0.as_ref(), expected, terms).await
    }
}

fn tenant_uri(tenant: Uuid, rest: &str) -> String {
    format!("/api/tenants/{}/{}", tenant, rest)
}

fn timestamp(value: &Value) -> DateTime<Utc> {
    serde_json::from_value(value.clone()).expect("timestamp")
}

#[actix_rt::test]
async fn usage_callback_debits_balance_once_per_reference() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    let (status, _) = send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": 200, "reason": "opening balance" }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let callback = json!({
        "tenantId": tenant,
        "referenceId": "SM100",
        "usage": { "kind": "sms", "segments": 1, "status": "delivered" }
    });
    let (status, body) = send(&app, api_post("/api/usage/callbacks", callback.clone()).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["billed"], json!(true));
    assert_eq!(body["entry"]["balance"], json!(195));
    assert_eq!(body["entry"]["transaction"]["amount"], json!(-5));

    // Provider retries the same callback
    let (status, body) = send(&app, api_post("/api/usage/callbacks", callback).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["duplicate"], json!(true));
    assert_eq!(body["entry"]["balance"], json!(195));

    let (_, history) = send(&app, api_get(&tenant_uri(tenant, "transactions")).to_request()).await;
    assert_eq!(history["totalCount"], json!(2));
    assert_eq!(history["balance"], json!(195));
}

#[actix_rt::test]
async fn unanswered_call_is_not_billed() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    let (status, body) = send(
        &app,
        api_post(
            "/api/usage/callbacks",
            json!({
                "tenantId": tenant,
                "referenceId": "CA200",
                "usage": { "kind": "voice", "duration_seconds": 0, "status": "no-answer" }
            }),
        )
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["billed"], json!(false));

    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(0));
}

#[actix_rt::test]
async fn out_of_range_usage_callback_is_a_bad_request() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    for (reference, usage) in [
        ("CA-max", json!({ "kind": "voice", "duration_seconds": i64::MAX, "status": "completed" })),
        ("SM-max", json!({ "kind": "sms", "segments": i64::MAX / 2, "status": "delivered" })),
    ] {
        let (status, body) = send(
            &app,
            api_post(
                "/api/usage/callbacks",
                json!({ "tenantId": tenant, "referenceId": reference, "usage": usage }),
            )
            .to_request(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}: {}", reference, body);
    }

    let (_, history) = send(&app, api_get(&tenant_uri(tenant, "transactions")).to_request()).await;
    assert_eq!(history["totalCount"], json!(0));
}

#[actix_rt::test]
async fn authorize_rejects_short_balance_without_writing() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": 3, "reason": "trial" })).to_request(),
    )
    .await;

    let (status, body) = send(
        &app,
        api_post("/api/usage/authorize", json!({ "tenantId": tenant, "kind": "sms" })).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["required"], json!(5));
    assert_eq!(body["available"], json!(3));

    let (_, history) = send(&app, api_get(&tenant_uri(tenant, "transactions")).to_request()).await;
    assert_eq!(history["totalCount"], json!(1));
}

#[actix_rt::test]
async fn authorize_passes_with_enough_balance() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": 100, "reason": "trial" })).to_request(),
    )
    .await;

    let (status, body) = send(
        &app,
        api_post(
            "/api/usage/authorize",
            json!({ "tenantId": tenant, "kind": "voice", "estimatedCost": 30 }),
        )
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["required"], json!(30));
    assert_eq!(body["balance"], json!(100));
}

#[actix_rt::test]
async fn redelivered_payment_webhook_credits_once() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    let succeeded = event(
        "evt_px_123",
        "payment_intent.succeeded",
        json!({
            "id": "px_123",
            "amount": 1000,
            "amount_received": 1000,
            "currency": "usd",
            "customer": "cus_external",
            "status": "succeeded",
            "created": 1700000000,
            "metadata": {
                "tenant_id": tenant.to_string(),
                "credits": "1000",
                "tax_rate": "0",
                "is_auto_recharge": "false"
            }
        }),
    );

    let (status, body) = send(&app, signed_webhook(&ctx.state, &succeeded).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("processed"));

    let (status, body) = send(&app, signed_webhook(&ctx.state, &succeeded).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("already_processed"));

    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(1000));
    let (_, history) = send(&app, api_get(&tenant_uri(tenant, "transactions")).to_request()).await;
    assert_eq!(history["totalCount"], json!(1));
}

#[actix_rt::test]
async fn webhook_with_bad_signature_is_rejected() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    let payload = event(
        "evt_forged",
        "payment_intent.succeeded",
        json!({
            "id": "pi_forged",
            "amount": 1000,
            "currency": "usd",
            "status": "succeeded",
            "created": 1700000000,
            "metadata": { "tenant_id": tenant.to_string(), "credits": "1000" }
        }),
    );
    let req = TestRequest::post()
        .uri("/webhooks/stripe")
        .insert_header(("Stripe-Signature", "t=1700000000,v1=deadbeef"))
        .set_payload(payload.to_string())
        .to_request();

    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(0));
}

#[actix_rt::test]
async fn webhook_with_extreme_timestamp_is_rejected() {
    let ctx = context();
    let app = init_app!(ctx);

    let req = TestRequest::post()
        .uri("/webhooks/stripe")
        .insert_header(("Stripe-Signature", format!("t={},v1=00", i64::MIN)))
        .set_payload(event("evt_skew", "payment_intent.succeeded", json!({})).to_string())
        .to_request();

    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn package_purchase_is_credited_by_the_webhook() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    let (status, method) = send(
        &app,
        api_post(&tenant_uri(tenant, "payment-methods"), json!({ "paymentMethodId": PAYMENT_METHOD }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(method["isDefault"], json!(true));

    let (_, packages) = send(&app, api_get("/api/credit-packages").to_request()).await;
    let standard = packages
        .as_array()
        .expect("package list")
        .iter()
        .find(|p| p["credits"] == json!(1000))
        .expect("1000 credit package")
        .clone();

    let (status, charge) = send(
        &app,
        api_post(&tenant_uri(tenant, "purchases"), json!({ "packageId": standard["id"] })).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(charge["record"]["status"], json!("pending"));

    // Nothing is credited until the processor confirms
    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(0));

    let intent_id = charge["record"]["externalPaymentId"].as_str().expect("intent id");
    let intent = ctx.processor.intent(intent_id).expect("scripted intent");
    let delivery = event(
        "evt_purchase",
        "payment_intent.succeeded",
        serde_json::to_value(&intent).expect("intent json"),
    );
    let (status, _) = send(&app, signed_webhook(&ctx.state, &delivery).to_request()).await;
    assert_eq!(status, StatusCode::OK);

    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(1000));
}

#[actix_rt::test]
async fn low_balance_usage_starts_one_recharge_per_cooldown() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": 55, "reason": "opening balance" }))
            .to_request(),
    )
    .await;
    send(
        &app,
        api_post(&tenant_uri(tenant, "payment-methods"), json!({ "paymentMethodId": PAYMENT_METHOD }))
            .to_request(),
    )
    .await;

    let (status, settings) = send(
        &app,
        api_put(
            &tenant_uri(tenant, "auto-recharge"),
            json!({ "enabled": true, "minimumBalance": 100, "rechargeAmount": 1000 }),
        )
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["lastTriggeredAt"], Value::Null);

    for reference in ["SM1", "SM2"] {
        let (status, _) = send(
            &app,
            api_post(
                "/api/usage/callbacks",
                json!({
                    "tenantId": tenant,
                    "referenceId": reference,
                    "usage": { "kind": "sms", "segments": 1, "status": "sent" }
                }),
            )
            .to_request(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(ctx.processor.created_charges(), 1);
    let requests = ctx.processor.charge_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount_minor, 1000);
    assert_eq!(requests[0].metadata.get("is_auto_recharge").map(String::as_str), Some("true"));

    let (_, settings) = send(&app, api_get(&tenant_uri(tenant, "auto-recharge")).to_request()).await;
    assert!(settings["lastTriggeredAt"].is_string());

    // A manual trigger inside the cooldown is refused
    let (status, decision) = send(
        &app,
        api_post(&tenant_uri(tenant, "auto-recharge/trigger"), json!({})).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(decision["decision"], json!("cooling_down"));
    assert_eq!(ctx.processor.created_charges(), 1);
}

#[actix_rt::test]
async fn auto_recharge_settings_are_not_found_until_configured() {
    let ctx = context();
    let app = init_app!(ctx);

    let (status, _) = send(&app, api_get(&tenant_uri(Uuid::new_v4(), "auto-recharge")).to_request()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn enabling_auto_recharge_requires_a_payment_method() {
    let ctx = context();
    let app = init_app!(ctx);

    let (status, _) = send(
        &app,
        api_put(
            &tenant_uri(Uuid::new_v4(), "auto-recharge"),
            json!({ "enabled": true, "minimumBalance": 100, "rechargeAmount": 1000 }),
        )
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn cron_suspends_subscription_the_tenant_cannot_afford() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": 50, "reason": "opening balance" }))
            .to_request(),
    )
    .await;
    let (status, _) = send(
        &app,
        api_post(
            &tenant_uri(tenant, "subscriptions"),
            json!({
                "resource": "+15550100",
                "monthlyCost": 100,
                "firstBillingDate": Utc::now() - Duration::hours(1)
            }),
        )
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let before = Utc::now();
    let (status, report) = send(&app, cron_run().to_request()).await;
    let after = Utc::now();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["billing"]["suspended"], json!(1));
    assert_eq!(report["complete"], json!(true));

    let (_, subscriptions) = send(&app, api_get(&tenant_uri(tenant, "subscriptions")).to_request()).await;
    let subscription = &subscriptions[0];
    assert_eq!(subscription["status"], json!("suspended"));
    let next = timestamp(&subscription["nextBillingDate"]);
    assert!(next >= before + Duration::days(7) && next <= after + Duration::days(7));

    let (_, history) = send(&app, api_get(&tenant_uri(tenant, "transactions")).to_request()).await;
    assert_eq!(history["totalCount"], json!(1));
    assert_eq!(history["balance"], json!(50));
}

#[actix_rt::test]
async fn cron_bills_due_subscription_exactly_once() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();
    let due = Utc::now() - Duration::hours(1);

    send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": 150, "reason": "opening balance" }))
            .to_request(),
    )
    .await;
    let (_, created) = send(
        &app,
        api_post(
            &tenant_uri(tenant, "subscriptions"),
            json!({ "resource": "+15550101", "monthlyCost": 100, "firstBillingDate": due }),
        )
        .to_request(),
    )
    .await;

    let (status, report) = send(&app, cron_run().to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["billing"]["charged"], json!(1));

    let (_, report) = send(&app, cron_run().to_request()).await;
    assert_eq!(report["billing"]["charged"], json!(0));

    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(50));

    let (_, subscriptions) = send(&app, api_get(&tenant_uri(tenant, "subscriptions")).to_request()).await;
    assert_eq!(subscriptions[0]["status"], json!("active"));
    assert_eq!(
        timestamp(&subscriptions[0]["nextBillingDate"]),
        timestamp(&created["nextBillingDate"]) + Duration::days(30)
    );
}

#[actix_rt::test]
async fn cron_reports_partial_failure_and_bills_the_rest() {
    let ctx = context_with(|mut repositories, store| {
        repositories.subscriptions = Arc::new(UnbillableResource(store.clone()));
        repositories
    });
    let app = init_app!(ctx);
    let due = Utc::now() - Duration::hours(1);
    let (tenant, other) = (Uuid::new_v4(), Uuid::new_v4());

    for (owner, resource) in [(tenant, UNBILLABLE_RESOURCE), (tenant, "+15550102"), (other, "+15550103")] {
        send(
            &app,
            api_post(&tenant_uri(owner, "adjustments"), json!({ "amount": 100, "reason": "opening balance" }))
                .to_request(),
        )
        .await;
        let (status, _) = send(
            &app,
            api_post(
                &tenant_uri(owner, "subscriptions"),
                json!({ "resource": resource, "monthlyCost": 40, "firstBillingDate": due }),
            )
            .to_request(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, report) = send(&app, cron_run().to_request()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(report["complete"], json!(false));
    assert_eq!(report["billing"]["processed"], json!(3));
    assert_eq!(report["billing"]["charged"], json!(2));
    let failures = report["billing"]["failures"].as_array().expect("failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["tenantId"], json!(tenant));

    // Two adjustments of 100 for the first tenant, one subscription charged
    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(160));
    let (_, balance) = send(&app, api_get(&tenant_uri(other, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(60));
}

#[actix_rt::test]
async fn overdrawing_adjustment_is_rejected_with_both_amounts() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": 40, "reason": "opening balance" }))
            .to_request(),
    )
    .await;

    let (status, body) = send(
        &app,
        api_post(&tenant_uri(tenant, "adjustments"), json!({ "amount": -100, "reason": "chargeback" }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["message"].as_str().expect("message");
    assert!(message.contains("Current balance: 40"), "{}", message);
    assert!(message.contains("requested deduction: 100"), "{}", message);

    let (_, balance) = send(&app, api_get(&tenant_uri(tenant, "balance")).to_request()).await;
    assert_eq!(balance["balance"], json!(40));
}

#[actix_rt::test]
async fn detached_payment_method_is_no_longer_listed() {
    let ctx = context();
    let app = init_app!(ctx);
    let tenant = Uuid::new_v4();

    send(
        &app,
        api_post(&tenant_uri(tenant, "payment-methods"), json!({ "paymentMethodId": PAYMENT_METHOD }))
            .to_request(),
    )
    .await;

    let req = TestRequest::delete()
        .uri(&tenant_uri(tenant, &format!("payment-methods/{}", PAYMENT_METHOD)))
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", SERVICE_TOKEN)))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(ctx.processor.detached_methods(), vec![PAYMENT_METHOD.to_string()]);

    let (_, listed) = send(&app, api_get(&tenant_uri(tenant, "payment-methods")).to_request()).await;
    assert_eq!(listed["paymentMethods"], json!([]));
}

#[actix_rt::test]
async fn api_requires_the_service_token() {
    let ctx = context();
    let app = init_app!(ctx);
    let uri = tenant_uri(Uuid::new_v4(), "balance");

    let (status, _) = send(&app, TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = TestRequest::get()
        .uri(&uri)
        .insert_header((header::AUTHORIZATION, "Bearer not-the-token"))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn cron_trigger_requires_the_cron_secret() {
    let ctx = context();
    let app = init_app!(ctx);

    let req = TestRequest::post()
        .uri("/internal/cron/billing")
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", SERVICE_TOKEN)))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn health_needs_no_credentials() {
    let ctx = context();
    let app = init_app!(ctx);

    let (status, body) = send(&app, TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}
