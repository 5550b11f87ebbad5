use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewReconciliationIssue, ReconciliationIssue};

/// Manual review queue for charges the ledger could not absorb
#[async_trait]
pub trait ReconciliationIssueRepository: Send + Sync {
    async fn enqueue(&self, issue: &NewReconciliationIssue) -> AppResult<ReconciliationIssue>;

    async fn list_open(&self) -> AppResult<Vec<ReconciliationIssue>>;
}

#[derive(Debug, Clone)]
pub struct PgReconciliationIssueRepository {
    pool: PgPool,
}

impl PgReconciliationIssueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReconciliationIssueRepository for PgReconciliationIssueRepository {
    async fn enqueue(&self, issue: &NewReconciliationIssue) -> AppResult<ReconciliationIssue> {
        sqlx::query_as::<_, ReconciliationIssue>(
            "INSERT INTO reconciliation_issues
                (id, tenant_id, external_payment_id, kind, detail, created_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             RETURNING id, tenant_id, external_payment_id, kind, detail, created_at, resolved_at",
        )
        .bind(Uuid::new_v4())
        .bind(issue.tenant_id)
        .bind(&issue.external_payment_id)
        .bind(&issue.kind)
        .bind(&issue.detail)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to enqueue reconciliation issue: {}", e)))
    }

    async fn list_open(&self) -> AppResult<Vec<ReconciliationIssue>> {
        sqlx::query_as::<_, ReconciliationIssue>(
            "SELECT id, tenant_id, external_payment_id, kind, detail, created_at, resolved_at
             FROM reconciliation_issues
             WHERE resolved_at IS NULL
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list reconciliation issues: {}", e)))
    }
}
