use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;

use credit_ledger_server::clients::{PaymentProcessor, StripeClient};
use credit_ledger_server::config::settings::StoreBackend;
use credit_ledger_server::config::init_config;
use credit_ledger_server::db::{MemoryStore, Repositories, create_pool, run_migrations, verify_connection};
use credit_ledger_server::routes::configure_app;
use credit_ledger_server::services::scheduled_jobs::start_billing_job;
use credit_ledger_server::services::{
    HttpNotificationDispatcher, LogNotificationDispatcher, NotificationDispatcher, NotificationQueue,
};
use credit_ledger_server::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match init_config() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    // Store setup
    let repositories = match app_settings.database.backend {
        StoreBackend::Postgres => {
            let db_pool = match create_pool(&app_settings.database).await {
                Ok(pool) => pool,
                Err(e) => {
                    log::error!("Failed to create database connection pool: {}", e);
                    log::error!("Cannot start server without a working database connection");
                    std::process::exit(1);
                }
            };
            if let Err(e) = verify_connection(&db_pool).await {
                log::error!("Database connection verification failed: {}", e);
                std::process::exit(1);
            }
            if let Err(e) = run_migrations(&db_pool).await {
                log::error!("Database migrations failed: {}", e);
                std::process::exit(1);
            }
            log::info!("Database connection established successfully");
            Repositories::postgres(db_pool)
        }
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store; balances are lost on restart");
            Repositories::memory(Arc::new(MemoryStore::with_default_packages()))
        }
    };

    let processor: Arc<dyn PaymentProcessor> = match StripeClient::new(&app_settings.stripe) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("Failed to initialize Stripe client: {}", e);
            std::process::exit(1);
        }
    };

    let dispatcher: Arc<dyn NotificationDispatcher> = match &app_settings.notifications.webhook_url {
        Some(url) => match HttpNotificationDispatcher::new(url.clone()) {
            Ok(dispatcher) => Arc::new(dispatcher),
            Err(e) => {
                log::error!("Failed to initialize notification dispatcher: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            log::info!("No notification webhook configured; notifications will be logged");
            Arc::new(LogNotificationDispatcher)
        }
    };
    let (notifications, _notification_worker) = NotificationQueue::start(
        dispatcher,
        app_settings.notifications.queue_capacity,
        app_settings.notifications.max_attempts,
    );

    let app_state = match AppState::build(app_settings, repositories, processor, notifications) {
        Ok(state) => state,
        Err(e) => {
            log::error!("Failed to initialize services: {}", e);
            std::process::exit(1);
        }
    };

    // In-process scheduling is optional; an external scheduler can call /internal/cron/billing instead
    let _scheduler = match app_state.settings.cron.schedule.clone() {
        Some(schedule) => match start_billing_job(
            &schedule,
            app_state.billing.clone(),
            app_state.auto_recharge.clone(),
        )
        .await
        {
            Ok(scheduler) => Some(scheduler),
            Err(e) => {
                log::error!("Failed to start billing scheduler: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let host = app_state.settings.server.host.clone();
    let port = app_state.settings.server.port;
    log::info!("Starting server at http://{}:{}", host, port);
    let listener = TcpListener::bind(format!("{}:{}", host, port))?;

    let app_data = web::Data::new(app_state);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(app_data.clone())
            .configure(configure_app)
    })
    .listen(listener)?
    .run()
    .await
}
