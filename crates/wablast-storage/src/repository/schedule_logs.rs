//! Schedule log repository (append-only)

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use wablast_common::types::CampaignId;

use crate::models::{NewScheduleLog, ScheduleLogEntry};

/// Schedule log repository
#[derive(Clone)]
pub struct ScheduleLogRepository {
    pool: PgPool,
}

impl ScheduleLogRepository {
    /// Create a new schedule log repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an entry on the given connection (usually a transaction)
    pub async fn append(
        conn: &mut PgConnection,
        entry: &NewScheduleLog,
    ) -> Result<ScheduleLogEntry, sqlx::Error> {
        sqlx::query_as::<_, ScheduleLogEntry>(
            r#"
            INSERT INTO schedule_logs (id, campaign_id, tenant_id, action, reason, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(entry.campaign_id)
        .bind(entry.tenant_id)
        .bind(entry.action.as_str())
        .bind(&entry.reason)
        .bind(&entry.metadata)
        .fetch_one(conn)
        .await
    }

    /// List entries for a campaign, oldest first
    pub async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<ScheduleLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, ScheduleLogEntry>(
            "SELECT * FROM schedule_logs WHERE campaign_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }
}
