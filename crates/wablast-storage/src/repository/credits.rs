//! Tenant credit ledger

use async_trait::async_trait;
use wablast_common::types::TenantId;
use wablast_common::Result;

use crate::db::{db_err, DatabasePool};

/// Credit ledger trait
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Subtract `amount` from the tenant's balance
    async fn decrement(&self, tenant_id: TenantId, amount: i64) -> Result<()>;

    /// Current balance, if the tenant has a ledger row
    async fn balance(&self, tenant_id: TenantId) -> Result<Option<i64>>;
}

/// Database credit ledger
pub struct DbCreditLedger {
    pool: DatabasePool,
}

impl DbCreditLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for DbCreditLedger {
    async fn decrement(&self, tenant_id: TenantId, amount: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_credits (tenant_id, balance)
            VALUES ($1, -$2)
            ON CONFLICT (tenant_id)
            DO UPDATE SET balance = tenant_credits.balance - $2, updated_at = NOW()
            "#,
        )
        .bind(tenant_id)
        .bind(amount)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn balance(&self, tenant_id: TenantId) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM tenant_credits WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(db_err)?;
        Ok(row.map(|(b,)| b))
    }
}
