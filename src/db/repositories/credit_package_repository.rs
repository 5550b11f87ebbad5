use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::CreditPackage;

#[async_trait]
pub trait CreditPackageRepository: Send + Sync {
    /// Active packages, smallest first.
    async fn list_active(&self) -> AppResult<Vec<CreditPackage>>;

    async fn get(&self, id: Uuid) -> AppResult<Option<CreditPackage>>;
}

/// Smallest active package that covers `credits`.
pub fn smallest_covering(packages: &[CreditPackage], credits: i64) -> Option<&CreditPackage> {
    packages
        .iter()
        .filter(|p| p.is_active && p.credits >= credits)
        .min_by_key(|p| p.credits)
}

#[derive(Debug, Clone)]
pub struct PgCreditPackageRepository {
    pool: PgPool,
}

impl PgCreditPackageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditPackageRepository for PgCreditPackageRepository {
    async fn list_active(&self) -> AppResult<Vec<CreditPackage>> {
        sqlx::query_as::<_, CreditPackage>(
            "SELECT id, name, credits, price, currency, is_active
             FROM credit_packages
             WHERE is_active
             ORDER BY credits ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list credit packages: {}", e)))
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<CreditPackage>> {
        sqlx::query_as::<_, CreditPackage>(
            "SELECT id, name, credits, price, currency, is_active FROM credit_packages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to get credit package: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn package(credits: i64, active: bool) -> CreditPackage {
        CreditPackage {
            id: Uuid::new_v4(),
            name: format!("{} credits", credits),
            credits,
            price: BigDecimal::from(credits / 100),
            currency: "usd".to_string(),
            is_active: active,
        }
    }

    #[test]
    fn picks_smallest_active_package_covering_amount() {
        let packages = vec![package(500, true), package(2500, true), package(1000, false), package(1500, true)];
        assert_eq!(smallest_covering(&packages, 1000).map(|p| p.credits), Some(1500));
        assert_eq!(smallest_covering(&packages, 500).map(|p| p.credits), Some(500));
        assert!(smallest_covering(&packages, 5000).is_none());
    }
}
