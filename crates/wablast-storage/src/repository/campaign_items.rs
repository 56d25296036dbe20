//! Campaign item repository

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use wablast_common::types::{CampaignId, CampaignItemId};

use crate::models::{CampaignItem, ItemCounts, ItemOutcome};

/// Rows inserted per statement when expanding a recipient list
const INSERT_CHUNK: usize = 1000;

/// Campaign item repository
#[derive(Clone)]
pub struct CampaignItemRepository {
    pool: PgPool,
}

impl CampaignItemRepository {
    /// Create a new campaign item repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one pending item per recipient, preserving list order
    pub async fn insert_batch(
        conn: &mut PgConnection,
        campaign_id: CampaignId,
        recipients: &[String],
    ) -> Result<u64, sqlx::Error> {
        let mut count = 0u64;

        for chunk in recipients.chunks(INSERT_CHUNK) {
            let ids: Vec<Uuid> = chunk.iter().map(|_| Uuid::now_v7()).collect();
            let result = sqlx::query(
                r#"
                INSERT INTO campaign_items (id, campaign_id, recipient)
                SELECT u.id, $1, u.recipient
                FROM UNNEST($2::uuid[], $3::text[]) WITH ORDINALITY AS u(id, recipient, ord)
                ORDER BY u.ord
                "#,
            )
            .bind(campaign_id)
            .bind(&ids)
            .bind(chunk)
            .execute(&mut *conn)
            .await?;

            count += result.rows_affected();
        }

        Ok(count)
    }

    /// Get an item by ID
    pub async fn get(&self, id: CampaignItemId) -> Result<Option<CampaignItem>, sqlx::Error> {
        sqlx::query_as::<_, CampaignItem>("SELECT * FROM campaign_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Oldest pending item of a campaign
    pub async fn next_pending(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignItem>, sqlx::Error> {
        sqlx::query_as::<_, CampaignItem>(
            r#"
            SELECT * FROM campaign_items
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY seq ASC
            LIMIT 1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Write a terminal outcome; `None` when the item was no longer pending
    pub async fn finish(
        &self,
        id: CampaignItemId,
        outcome: &ItemOutcome,
    ) -> Result<Option<CampaignItem>, sqlx::Error> {
        sqlx::query_as::<_, CampaignItem>(
            r#"
            UPDATE campaign_items SET
                status = $2,
                sent_at = $3,
                error_message = $4,
                response_data = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(outcome.status().as_str())
        .bind(outcome.sent_at())
        .bind(outcome.error_message())
        .bind(outcome.response_data().cloned())
        .fetch_optional(&self.pool)
        .await
    }

    /// Count items by status
    pub async fn counts(&self, campaign_id: CampaignId) -> Result<ItemCounts, sqlx::Error> {
        sqlx::query_as::<_, ItemCounts>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM campaign_items
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Recipients of a campaign in creation order
    pub async fn recipients(&self, campaign_id: CampaignId) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT recipient FROM campaign_items WHERE campaign_id = $1 ORDER BY seq ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(r,)| r).collect())
    }
}
