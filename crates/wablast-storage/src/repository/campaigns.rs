//! Campaign store: trait and PostgreSQL implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;
use wablast_common::types::{CampaignId, CampaignItemId, RecipientAddress, TenantId};
use wablast_common::{Error, Result};

use super::campaign_items::CampaignItemRepository;
use super::schedule_logs::ScheduleLogRepository;
use crate::db::{db_err, DatabasePool};
use crate::models::{
    Campaign, CampaignCounters, CampaignItem, CampaignPatch, CampaignStatus, CounterDelta,
    CreateCampaign, ItemCounts, ItemOutcome, NewScheduleLog, ScheduleLogEntry, TransitionGuard,
};

/// Persistence seam for the dispatch engine.
///
/// Every mutation that races with another actor (scheduler ticks, workers,
/// operator requests, executor callbacks) is conditional: callers receive
/// `None` when the row no longer matched and nothing was written.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Insert a draft campaign and one pending item per recipient
    async fn create_campaign(
        &self,
        input: CreateCampaign,
        recipients: &[RecipientAddress],
    ) -> Result<Campaign>;

    /// Insert the next run of a recurring campaign already `scheduled`, with
    /// its items and a `scheduled` log entry, in one write. `None` when the
    /// parent already has a run at the same `scheduled_at`.
    async fn create_next_run(
        &self,
        input: CreateCampaign,
        recipients: &[RecipientAddress],
    ) -> Result<Option<Campaign>>;

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;

    async fn get_campaign_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>>;

    /// Scheduled, unpaused campaigns with `scheduled_at <= now`, oldest first
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>>;

    /// Paused campaigns whose `pause_until` has passed
    async fn list_expired_pauses(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>>;

    /// Processing campaigns not written since `stale_before`
    async fn list_stalled(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Campaign>>;

    /// Apply `patch` and append `log` atomically if `guard` still holds
    async fn transition(
        &self,
        id: CampaignId,
        guard: TransitionGuard,
        patch: CampaignPatch,
        log: NewScheduleLog,
    ) -> Result<Option<Campaign>>;

    /// Recipients of a campaign in creation order
    async fn list_recipients(&self, campaign_id: CampaignId) -> Result<Vec<String>>;

    /// Oldest pending item of a campaign
    async fn next_pending_item(&self, campaign_id: CampaignId) -> Result<Option<CampaignItem>>;

    async fn get_item(&self, id: CampaignItemId) -> Result<Option<CampaignItem>>;

    /// Write a terminal outcome; `None` when the item was not pending
    async fn finish_item(
        &self,
        id: CampaignItemId,
        outcome: &ItemOutcome,
    ) -> Result<Option<CampaignItem>>;

    async fn item_counts(&self, campaign_id: CampaignId) -> Result<ItemCounts>;

    /// Atomically add to the counters, clamped to `total_recipients`
    async fn apply_counter_delta(
        &self,
        campaign_id: CampaignId,
        delta: CounterDelta,
    ) -> Result<Option<CampaignCounters>>;

    /// Raise the counters to the item tallies (never lowers them)
    async fn sync_counters_from_items(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignCounters>>;

    /// Audit trail for a campaign, oldest first
    async fn list_logs(&self, campaign_id: CampaignId) -> Result<Vec<ScheduleLogEntry>>;
}

/// Parent and slot identifying a recurring run
pub(crate) fn next_run_key(input: &CreateCampaign) -> Result<(CampaignId, DateTime<Utc>)> {
    match (input.parent_campaign_id, input.scheduled_at) {
        (Some(parent), Some(at)) => Ok((parent, at)),
        _ => Err(Error::Validation(
            "A recurring run needs a parent campaign and a scheduled time".to_string(),
        )),
    }
}

/// Total recipients as stored in the campaign row
pub(crate) fn recipient_total(recipients: &[RecipientAddress]) -> Result<i32> {
    i32::try_from(recipients.len())
        .map_err(|_| Error::Validation("Too many recipients for one campaign".to_string()))
}

fn addresses(recipients: &[RecipientAddress]) -> Vec<String> {
    recipients.iter().map(|r| r.as_str().to_string()).collect()
}

/// Insert a campaign row; `None` when it collides with an existing run of
/// the same parent and slot
async fn insert_campaign(
    conn: &mut PgConnection,
    input: &CreateCampaign,
    total: i32,
    status: CampaignStatus,
) -> std::result::Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        INSERT INTO campaigns (
            id, tenant_id, parent_campaign_id, name, message, media_url, buttons,
            instance_id, schedule_type, scheduled_at, recurrence_pattern, timezone,
            min_delay, max_delay, throttle_enabled, throttle_rate, throttle_delay,
            total_recipients, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        ON CONFLICT DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.tenant_id)
    .bind(input.parent_campaign_id)
    .bind(&input.name)
    .bind(&input.message)
    .bind(&input.media_url)
    .bind(&input.buttons)
    .bind(&input.instance_id)
    .bind(input.schedule_type.as_str())
    .bind(input.scheduled_at)
    .bind(&input.recurrence_pattern)
    .bind(input.timezone.as_deref().unwrap_or("UTC"))
    .bind(input.min_delay)
    .bind(input.max_delay)
    .bind(input.throttle_enabled)
    .bind(input.throttle_rate)
    .bind(input.throttle_delay)
    .bind(total)
    .bind(status.as_str())
    .fetch_optional(conn)
    .await
}

/// PostgreSQL campaign store
pub struct DbCampaignStore {
    pool: DatabasePool,
    items: CampaignItemRepository,
    logs: ScheduleLogRepository,
}

impl DbCampaignStore {
    pub fn new(pool: DatabasePool) -> Self {
        let items = CampaignItemRepository::new(pool.pool().clone());
        let logs = ScheduleLogRepository::new(pool.pool().clone());
        Self { pool, items, logs }
    }
}

#[async_trait]
impl CampaignStore for DbCampaignStore {
    async fn create_campaign(
        &self,
        input: CreateCampaign,
        recipients: &[RecipientAddress],
    ) -> Result<Campaign> {
        let total = recipient_total(recipients)?;
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let campaign = insert_campaign(&mut tx, &input, total, CampaignStatus::Draft)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::Internal("Campaign insert returned no row".to_string()))?;
        let inserted = CampaignItemRepository::insert_batch(&mut tx, campaign.id, &addresses(recipients))
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(campaign_id = %campaign.id, items = inserted, "Campaign created");
        Ok(campaign)
    }

    async fn create_next_run(
        &self,
        input: CreateCampaign,
        recipients: &[RecipientAddress],
    ) -> Result<Option<Campaign>> {
        let (parent_id, _) = next_run_key(&input)?;
        let total = recipient_total(recipients)?;
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let inserted = insert_campaign(&mut tx, &input, total, CampaignStatus::Scheduled)
            .await
            .map_err(db_err)?;
        let Some(campaign) = inserted else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        };

        CampaignItemRepository::insert_batch(&mut tx, campaign.id, &addresses(recipients))
            .await
            .map_err(db_err)?;
        ScheduleLogRepository::append(&mut tx, &NewScheduleLog::next_run(&campaign, parent_id))
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(Some(campaign))
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn get_campaign_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND is_paused = FALSE
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_expired_pauses(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE is_paused = TRUE
              AND pause_until IS NOT NULL
              AND pause_until <= $1
            ORDER BY pause_until ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_stalled(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'processing' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(stale_before)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn transition(
        &self,
        id: CampaignId,
        guard: TransitionGuard,
        patch: CampaignPatch,
        log: NewScheduleLog,
    ) -> Result<Option<Campaign>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let updated = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                is_paused = $3,
                pause_until = $4,
                started_at = COALESCE(started_at, $5),
                completed_at = $6,
                updated_at = NOW()
            WHERE id = $1
              AND status = $7
              AND ($8::timestamptz IS NULL OR updated_at < $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(patch.status.as_str())
        .bind(patch.is_paused)
        .bind(patch.pause_until)
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(guard.expected_status.as_str())
        .bind(guard.stale_before)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(campaign) = updated else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        };

        ScheduleLogRepository::append(&mut tx, &log)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(Some(campaign))
    }

    async fn list_recipients(&self, campaign_id: CampaignId) -> Result<Vec<String>> {
        self.items.recipients(campaign_id).await.map_err(db_err)
    }

    async fn next_pending_item(&self, campaign_id: CampaignId) -> Result<Option<CampaignItem>> {
        self.items.next_pending(campaign_id).await.map_err(db_err)
    }

    async fn get_item(&self, id: CampaignItemId) -> Result<Option<CampaignItem>> {
        self.items.get(id).await.map_err(db_err)
    }

    async fn finish_item(
        &self,
        id: CampaignItemId,
        outcome: &ItemOutcome,
    ) -> Result<Option<CampaignItem>> {
        self.items.finish(id, outcome).await.map_err(db_err)
    }

    async fn item_counts(&self, campaign_id: CampaignId) -> Result<ItemCounts> {
        self.items.counts(campaign_id).await.map_err(db_err)
    }

    async fn apply_counter_delta(
        &self,
        campaign_id: CampaignId,
        delta: CounterDelta,
    ) -> Result<Option<CampaignCounters>> {
        sqlx::query_as::<_, CampaignCounters>(
            r#"
            UPDATE campaigns SET
                sent_count = sent_count + LEAST(
                    GREATEST($2, 0),
                    GREATEST(total_recipients - sent_count - failed_count, 0)
                ),
                failed_count = failed_count + LEAST(
                    GREATEST($3, 0),
                    GREATEST(total_recipients - sent_count - failed_count, 0)
                        - LEAST(GREATEST($2, 0), GREATEST(total_recipients - sent_count - failed_count, 0))
                ),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id AS campaign_id, total_recipients, sent_count, failed_count
            "#,
        )
        .bind(campaign_id)
        .bind(delta.sent)
        .bind(delta.failed)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn sync_counters_from_items(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignCounters>> {
        sqlx::query_as::<_, CampaignCounters>(
            r#"
            WITH tallies AS (
                SELECT
                    (COUNT(*) FILTER (WHERE status = 'sent'))::int AS sent,
                    (COUNT(*) FILTER (WHERE status = 'failed'))::int AS failed
                FROM campaign_items
                WHERE campaign_id = $1
            )
            UPDATE campaigns c SET
                sent_count = c.sent_count + LEAST(
                    GREATEST(t.sent - c.sent_count, 0),
                    GREATEST(c.total_recipients - c.sent_count - c.failed_count, 0)
                ),
                failed_count = c.failed_count + LEAST(
                    GREATEST(t.failed - c.failed_count, 0),
                    GREATEST(c.total_recipients - c.sent_count - c.failed_count, 0)
                        - LEAST(
                            GREATEST(t.sent - c.sent_count, 0),
                            GREATEST(c.total_recipients - c.sent_count - c.failed_count, 0)
                        )
                ),
                updated_at = NOW()
            FROM tallies t
            WHERE c.id = $1
            RETURNING c.id AS campaign_id, c.total_recipients, c.sent_count, c.failed_count
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_logs(&self, campaign_id: CampaignId) -> Result<Vec<ScheduleLogEntry>> {
        self.logs.list_by_campaign(campaign_id).await.map_err(db_err)
    }
}
