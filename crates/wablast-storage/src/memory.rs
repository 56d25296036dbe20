//! In-memory campaign store
//!
//! Mirrors the conditional-update semantics of the PostgreSQL store so the
//! engine can run without a database (`database.backend = "memory"`) and so
//! tests exercise the same races.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;
use wablast_common::types::{CampaignId, CampaignItemId, RecipientAddress, TenantId};
use wablast_common::{Error, Result};

use crate::models::{
    clamp_counters, Campaign, CampaignCounters, CampaignItem, CampaignPatch, CampaignStatus,
    CounterDelta, CreateCampaign, ItemCounts, ItemOutcome, ItemStatus, NewScheduleLog,
    ScheduleLogEntry, TransitionGuard,
};
use crate::repository::campaigns::{next_run_key, recipient_total, CampaignStore};
use crate::repository::credits::CreditLedger;

#[derive(Default)]
struct Inner {
    campaigns: HashMap<CampaignId, Campaign>,
    items: HashMap<CampaignItemId, CampaignItem>,
    /// Item ids per campaign in `seq` order
    item_order: HashMap<CampaignId, Vec<CampaignItemId>>,
    logs: Vec<ScheduleLogEntry>,
    next_seq: i64,
}

impl Inner {
    fn items_of(&self, campaign_id: CampaignId) -> impl Iterator<Item = &CampaignItem> {
        self.item_order
            .get(&campaign_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.items.get(id))
    }

    fn counts(&self, campaign_id: CampaignId) -> ItemCounts {
        let mut counts = ItemCounts::default();
        for item in self.items_of(campaign_id) {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Sent => counts.sent += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn insert(
        &mut self,
        input: CreateCampaign,
        recipients: &[RecipientAddress],
        total: i32,
        status: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Campaign {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            parent_campaign_id: input.parent_campaign_id,
            name: input.name,
            message: input.message,
            media_url: input.media_url,
            buttons: input.buttons,
            instance_id: input.instance_id,
            schedule_type: input.schedule_type,
            scheduled_at: input.scheduled_at,
            recurrence_pattern: input.recurrence_pattern,
            timezone: input.timezone.unwrap_or_else(|| "UTC".to_string()),
            min_delay: input.min_delay,
            max_delay: input.max_delay,
            throttle_enabled: input.throttle_enabled,
            throttle_rate: input.throttle_rate,
            throttle_delay: input.throttle_delay,
            is_paused: false,
            pause_until: None,
            total_recipients: total,
            sent_count: 0,
            failed_count: 0,
            status,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut order = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            self.next_seq += 1;
            let item = CampaignItem {
                id: Uuid::now_v7(),
                campaign_id: campaign.id,
                seq: self.next_seq,
                recipient: recipient.as_str().to_string(),
                status: ItemStatus::Pending,
                sent_at: None,
                error_message: None,
                response_data: None,
                created_at: now,
                updated_at: now,
            };
            order.push(item.id);
            self.items.insert(item.id, item);
        }

        self.item_order.insert(campaign.id, order);
        self.campaigns.insert(campaign.id, campaign.clone());
        campaign
    }

    fn append_log(&mut self, log: NewScheduleLog, now: DateTime<Utc>) {
        self.logs.push(ScheduleLogEntry {
            id: Uuid::now_v7(),
            campaign_id: log.campaign_id,
            tenant_id: log.tenant_id,
            action: log.action,
            reason: log.reason,
            metadata: log.metadata,
            created_at: now,
        });
    }
}

/// In-memory campaign store
#[derive(Default)]
pub struct MemoryCampaignStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a database error (fault injection)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Database("store is rejecting writes".to_string()));
        }
        Ok(())
    }

    fn sorted(
        mut campaigns: Vec<Campaign>,
        key: fn(&Campaign) -> Option<DateTime<Utc>>,
        limit: i64,
    ) -> Vec<Campaign> {
        campaigns.sort_by_key(|c| (key(c), c.id));
        campaigns.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        campaigns
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn create_campaign(
        &self,
        input: CreateCampaign,
        recipients: &[RecipientAddress],
    ) -> Result<Campaign> {
        self.check_writable()?;
        let total = recipient_total(recipients)?;
        let mut inner = self.inner.lock().await;
        Ok(inner.insert(input, recipients, total, CampaignStatus::Draft, Utc::now()))
    }

    async fn create_next_run(
        &self,
        input: CreateCampaign,
        recipients: &[RecipientAddress],
    ) -> Result<Option<Campaign>> {
        self.check_writable()?;
        let (parent_id, scheduled_at) = next_run_key(&input)?;
        let total = recipient_total(recipients)?;
        let mut inner = self.inner.lock().await;

        let exists = inner.campaigns.values().any(|c| {
            c.parent_campaign_id == Some(parent_id) && c.scheduled_at == Some(scheduled_at)
        });
        if exists {
            return Ok(None);
        }

        let now = Utc::now();
        let campaign = inner.insert(input, recipients, total, CampaignStatus::Scheduled, now);
        let log = NewScheduleLog::next_run(&campaign, parent_id);
        inner.append_log(log, now);
        Ok(Some(campaign))
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.inner.lock().await.campaigns.get(&id).cloned())
    }

    async fn get_campaign_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        Ok(self
            .inner
            .lock()
            .await
            .campaigns
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>> {
        let inner = self.inner.lock().await;
        let due = inner
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled
                    && !c.is_paused
                    && c.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        Ok(Self::sorted(due, |c| c.scheduled_at, limit))
    }

    async fn list_expired_pauses(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>> {
        let inner = self.inner.lock().await;
        let expired = inner
            .campaigns
            .values()
            .filter(|c| c.is_paused && c.pause_until.is_some_and(|until| until <= now))
            .cloned()
            .collect();
        Ok(Self::sorted(expired, |c| c.pause_until, limit))
    }

    async fn list_stalled(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Campaign>> {
        let inner = self.inner.lock().await;
        let stalled = inner
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Processing && c.updated_at < stale_before)
            .cloned()
            .collect();
        Ok(Self::sorted(stalled, |c| Some(c.updated_at), limit))
    }

    async fn transition(
        &self,
        id: CampaignId,
        guard: TransitionGuard,
        patch: CampaignPatch,
        log: NewScheduleLog,
    ) -> Result<Option<Campaign>> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        let Some(campaign) = inner.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !guard.holds_for(campaign) {
            return Ok(None);
        }

        let now = Utc::now();
        campaign.status = patch.status;
        campaign.is_paused = patch.is_paused;
        campaign.pause_until = patch.pause_until;
        if campaign.started_at.is_none() {
            campaign.started_at = patch.started_at;
        }
        campaign.completed_at = patch.completed_at;
        campaign.updated_at = now;
        let updated = campaign.clone();

        inner.append_log(log, now);

        Ok(Some(updated))
    }

    async fn list_recipients(&self, campaign_id: CampaignId) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let recipients = inner
            .items_of(campaign_id)
            .map(|item| item.recipient.clone())
            .collect();
        Ok(recipients)
    }

    async fn next_pending_item(&self, campaign_id: CampaignId) -> Result<Option<CampaignItem>> {
        let inner = self.inner.lock().await;
        let next = inner
            .items_of(campaign_id)
            .find(|item| item.status == ItemStatus::Pending)
            .cloned();
        Ok(next)
    }

    async fn get_item(&self, id: CampaignItemId) -> Result<Option<CampaignItem>> {
        Ok(self.inner.lock().await.items.get(&id).cloned())
    }

    async fn finish_item(
        &self,
        id: CampaignItemId,
        outcome: &ItemOutcome,
    ) -> Result<Option<CampaignItem>> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        let Some(item) = inner.items.get_mut(&id) else {
            return Ok(None);
        };
        if item.status != ItemStatus::Pending {
            return Ok(None);
        }

        item.status = outcome.status();
        item.sent_at = outcome.sent_at();
        item.error_message = outcome.error_message().map(str::to_string);
        item.response_data = outcome.response_data().cloned();
        item.updated_at = Utc::now();
        Ok(Some(item.clone()))
    }

    async fn item_counts(&self, campaign_id: CampaignId) -> Result<ItemCounts> {
        Ok(self.inner.lock().await.counts(campaign_id))
    }

    async fn apply_counter_delta(
        &self,
        campaign_id: CampaignId,
        delta: CounterDelta,
    ) -> Result<Option<CampaignCounters>> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        let Some(campaign) = inner.campaigns.get_mut(&campaign_id) else {
            return Ok(None);
        };
        let (sent, failed) = clamp_counters(
            campaign.total_recipients,
            (campaign.sent_count, campaign.failed_count),
            (delta.sent, delta.failed),
        );
        campaign.sent_count = sent;
        campaign.failed_count = failed;
        campaign.updated_at = Utc::now();
        Ok(Some(campaign.counters()))
    }

    async fn sync_counters_from_items(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignCounters>> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        let counts = inner.counts(campaign_id);
        let Some(campaign) = inner.campaigns.get_mut(&campaign_id) else {
            return Ok(None);
        };
        let tally = |n: i64| i32::try_from(n).unwrap_or(i32::MAX);
        // Only the part of the tally not yet counted is added
        let (sent, failed) = clamp_counters(
            campaign.total_recipients,
            (campaign.sent_count, campaign.failed_count),
            (
                tally(counts.sent).saturating_sub(campaign.sent_count),
                tally(counts.failed).saturating_sub(campaign.failed_count),
            ),
        );
        campaign.sent_count = sent;
        campaign.failed_count = failed;
        campaign.updated_at = Utc::now();
        Ok(Some(campaign.counters()))
    }

    async fn list_logs(&self, campaign_id: CampaignId) -> Result<Vec<ScheduleLogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .logs
            .iter()
            .filter(|entry| entry.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

/// In-memory credit ledger
#[derive(Default)]
pub struct MemoryCreditLedger {
    balances: Mutex<HashMap<TenantId, i64>>,
    fail: AtomicBool,
}

impl MemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every decrement fail (fault injection)
    pub fn fail_decrements(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CreditLedger for MemoryCreditLedger {
    async fn decrement(&self, tenant_id: TenantId, amount: i64) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Database("credit ledger unavailable".to_string()));
        }
        *self.balances.lock().await.entry(tenant_id).or_insert(0) -= amount;
        Ok(())
    }

    async fn balance(&self, tenant_id: TenantId) -> Result<Option<i64>> {
        Ok(self.balances.lock().await.get(&tenant_id).copied())
    }
}
