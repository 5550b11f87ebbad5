use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::settings::DatabaseConfig;
use crate::error::AppError;

const CONNECT_ATTEMPTS: u32 = 3;

/// Creates the PostgreSQL pool, retrying while the database comes up.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, AppError> {
    let database_url = config
        .url
        .as_deref()
        .ok_or_else(|| AppError::Configuration("DATABASE_URL must be set".to_string()))?;

    log::info!(
        "Creating database connection pool (max_connections={})",
        config.max_connections
    );

    let mut last_error = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(60))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                log::info!("Connected to database on attempt {}", attempt);
                return Ok(pool);
            }
            Err(e) => {
                log::warn!("Database connection attempt {} of {} failed: {}", attempt, CONNECT_ATTEMPTS, e);

                if e.to_string().contains("authentication failed") {
                    log::error!("Database authentication failed. Check the DATABASE_URL credentials.");
                    return Err(AppError::Database(e.to_string()));
                }

                last_error = Some(e);
                if attempt < CONNECT_ATTEMPTS {
                    let delay = Duration::from_secs(2 * attempt as u64);
                    log::info!("Retrying in {} seconds...", delay.as_secs());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let message = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "Unknown database connection error".to_string());
    log::error!("All database connection attempts failed: {}", message);
    Err(AppError::Database(message))
}

/// Applies the embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;
    log::info!("Database migrations applied");
    Ok(())
}

/// Round-trip check run once at startup.
pub async fn verify_connection(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query_as::<_, (i32,)>("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| {
            log::error!("Database connection verification failed: {}", e);
            AppError::Database(e.to_string())
        })?;
    Ok(())
}
