use sqlx::{Error as SqlxError, PgPool, Postgres, Transaction};
use tokio::time::{sleep, Duration};

use crate::error::AppError;

const BEGIN_ATTEMPTS: usize = 3;
const BASE_BACKOFF_MS: u64 = 50;

pub struct AcquireRetry;

impl AcquireRetry {
    /// Starts a transaction, backing off when the pool is saturated.
    pub async fn begin_with_retry(
        pool: &PgPool,
        attempts: usize,
        base_backoff_ms: u64,
    ) -> Result<Transaction<'_, Postgres>, SqlxError> {
        let mut tries = 0;
        loop {
            match pool.begin().await {
                Ok(tx) => return Ok(tx),
                Err(e) => {
                    let timed_out = matches!(e, SqlxError::PoolTimedOut);
                    if timed_out && tries + 1 < attempts {
                        let backoff = base_backoff_ms.saturating_mul(1 << tries);
                        log::warn!(
                            "begin() PoolTimedOut; retrying (attempt={}, backoff_ms={})",
                            tries + 1,
                            backoff
                        );
                        sleep(Duration::from_millis(backoff)).await;
                        tries += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Default transaction start for repositories.
pub async fn begin(pool: &PgPool) -> Result<Transaction<'_, Postgres>, AppError> {
    AcquireRetry::begin_with_retry(pool, BEGIN_ATTEMPTS, BASE_BACKOFF_MS)
        .await
        .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))
}

/// Serializes writers for one tenant until the transaction ends.
pub async fn lock_tenant(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: uuid::Uuid,
) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("ledger:{}", tenant_id))
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::Database(format!("Failed to lock tenant ledger: {}", e)))?;
    Ok(())
}
