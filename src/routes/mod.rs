use actix_web::web;
use actix_web_httpauth::middleware::HttpAuthentication;

use crate::handlers::billing::{
    auto_recharge_handlers, credit_handlers, payment_handlers, subscription_handlers, webhook_handlers,
};
use crate::handlers::{cron_handlers, health, usage_handlers};
use crate::middleware::{cron_secret_validator, service_token_validator};

/// Every route the server exposes
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health::health_check)));

    // Protected API routes (/api/*)
    cfg.service(
        web::scope("/api")
            .wrap(HttpAuthentication::bearer(service_token_validator))
            .configure(configure_routes),
    );

    // Public webhook routes, authenticated by signature (/webhooks/*)
    cfg.service(web::scope("/webhooks").configure(configure_webhook_routes));

    // Scheduler trigger (/internal/*)
    cfg.service(
        web::scope("/internal")
            .wrap(HttpAuthentication::bearer(cron_secret_validator))
            .configure(configure_internal_routes),
    );
}

// Configure protected API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Usage routes (/api/usage/*)
    cfg.service(
        web::scope("/usage")
            .route("/authorize", web::post().to(usage_handlers::authorize_usage))
            .route("/callbacks", web::post().to(usage_handlers::usage_callback)),
    );

    cfg.route(
        "/credit-packages",
        web::get().to(credit_handlers::list_credit_packages),
    );

    // Tenant routes (/api/tenants/{tenant_id}/*)
    cfg.service(
        web::scope("/tenants")
            .route("/{tenant_id}/balance", web::get().to(credit_handlers::get_balance))
            .route("/{tenant_id}/transactions", web::get().to(credit_handlers::get_transactions))
            .route("/{tenant_id}/adjustments", web::post().to(credit_handlers::create_adjustment))
            .service(auto_recharge_handlers::get_auto_recharge_settings)
            .service(auto_recharge_handlers::update_auto_recharge_settings)
            .service(auto_recharge_handlers::trigger_auto_recharge)
            .service(payment_handlers::purchase_credits)
            .service(payment_handlers::list_payment_methods)
            .service(payment_handlers::attach_payment_method)
            .service(payment_handlers::detach_payment_method)
            .service(subscription_handlers::list_subscriptions)
            .service(subscription_handlers::register_subscription),
    );
}

// Configure webhook routes (no bearer authentication - /webhooks/*)
pub fn configure_webhook_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(webhook_handlers::stripe_webhook);
}

pub fn configure_internal_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/cron/billing", web::post().to(cron_handlers::run_billing_cycle));
}
