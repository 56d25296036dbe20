//! Counter reconciliation and executor status reports

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wablast_common::types::{CampaignId, CampaignItemId};
use wablast_storage::models::{
    Campaign, CampaignCounters, CampaignItem, CampaignStatus, CounterDelta, ItemOutcome,
    ItemStatus,
};
use wablast_storage::repository::CampaignStore;

use super::lifecycle::{StateMachine, Transition};
use crate::error::{CampaignError, Result};

/// How campaign counters are brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    /// Add the given amounts
    Delta(CounterDelta),
    /// Raise the counters to the item tallies
    Recount,
}

/// Terminal status reported for an item by an external executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatusReport {
    pub status: ItemStatus,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub response_data: Option<serde_json::Value>,
}

impl ItemStatusReport {
    fn into_outcome(self) -> Result<ItemOutcome> {
        match self.status {
            ItemStatus::Sent => Ok(ItemOutcome::Sent {
                sent_at: self.sent_at.unwrap_or_else(Utc::now),
                response_data: self.response_data,
            }),
            ItemStatus::Failed => Ok(ItemOutcome::Failed {
                error: self
                    .error_message
                    .unwrap_or_else(|| "Reported as failed".to_string()),
                response_data: self.response_data,
            }),
            ItemStatus::Pending => Err(CampaignError::Validation(
                "status must be 'sent' or 'failed'".to_string(),
            )),
        }
    }
}

/// Keeps campaign counters consistent with item outcomes and finalizes
/// campaigns once nothing is left to send
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CampaignStore>,
    machine: StateMachine,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        let machine = StateMachine::new(store.clone());
        Self { store, machine }
    }

    /// Update counters without finalizing
    pub async fn apply(
        &self,
        campaign_id: CampaignId,
        update: CounterUpdate,
    ) -> Result<CampaignCounters> {
        let counters = match update {
            CounterUpdate::Delta(delta) => {
                if delta.sent < 0 || delta.failed < 0 {
                    return Err(CampaignError::Validation(
                        "Counter increments must not be negative".to_string(),
                    ));
                }
                self.store.apply_counter_delta(campaign_id, delta).await?
            }
            CounterUpdate::Recount => self.store.sync_counters_from_items(campaign_id).await?,
        };

        counters.ok_or_else(|| CampaignError::campaign_not_found(campaign_id))
    }

    /// Update counters, then complete the campaign if it is done
    pub async fn reconcile(
        &self,
        campaign_id: CampaignId,
        update: CounterUpdate,
    ) -> Result<CampaignCounters> {
        let counters = self.apply(campaign_id, update).await?;
        self.maybe_finalize(campaign_id).await?;
        Ok(counters)
    }

    /// Complete a processing campaign with no pending items, or whose
    /// counters already account for every recipient
    pub async fn maybe_finalize(&self, campaign_id: CampaignId) -> Result<Option<CampaignStatus>> {
        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            return Ok(None);
        };
        if campaign.status != CampaignStatus::Processing {
            return Ok(None);
        }

        let exhausted = campaign.processed_count() >= campaign.total_recipients
            || self.store.item_counts(campaign_id).await?.pending == 0;
        if !exhausted {
            return Ok(None);
        }

        let finished = self.complete(campaign_id).await?;
        Ok(finished.map(|c| c.status))
    }

    /// Recount from the item rows, then complete a processing campaign using
    /// the fresh counters. `None` when it is no longer processing.
    pub async fn complete(&self, campaign_id: CampaignId) -> Result<Option<Campaign>> {
        self.apply(campaign_id, CounterUpdate::Recount).await?;

        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            return Ok(None);
        };
        if campaign.status != CampaignStatus::Processing || campaign.is_paused {
            return Ok(None);
        }
        self.machine.apply(&campaign, &Transition::Complete).await
    }

    /// Record an externally reported item outcome.
    ///
    /// Re-reporting an item that already has a terminal status returns it
    /// unchanged and touches no counters.
    pub async fn report_item_status(
        &self,
        item_id: CampaignItemId,
        report: ItemStatusReport,
    ) -> Result<CampaignItem> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| CampaignError::item_not_found(item_id))?;

        if item.status != ItemStatus::Pending {
            debug!(item_id = %item_id, status = %item.status, "Item already final, report ignored");
            return Ok(item);
        }

        let outcome = report.into_outcome()?;
        let Some(updated) = self.store.finish_item(item_id, &outcome).await? else {
            // Finished concurrently; report the winner
            return self
                .store
                .get_item(item_id)
                .await?
                .ok_or_else(|| CampaignError::item_not_found(item_id));
        };

        let counters = self.reconcile(updated.campaign_id, CounterUpdate::Recount).await?;
        info!(
            item_id = %item_id,
            campaign_id = %updated.campaign_id,
            status = %updated.status,
            sent = counters.sent_count,
            failed = counters.failed_count,
            "Item status reported"
        );

        Ok(updated)
    }

    /// Apply an externally reported counter increment
    pub async fn increment_counters(
        &self,
        campaign_id: CampaignId,
        sent: i32,
        failed: i32,
    ) -> Result<CampaignCounters> {
        self.reconcile(campaign_id, CounterUpdate::Delta(CounterDelta { sent, failed }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_campaign, start_campaign};
    use pretty_assertions::assert_eq;
    use wablast_storage::models::ScheduleType;
    use wablast_storage::MemoryCampaignStore;

    fn sent_report() -> ItemStatusReport {
        ItemStatusReport {
            status: ItemStatus::Sent,
            error_message: None,
            sent_at: None,
            response_data: Some(serde_json::json!({"id": "ext-1"})),
        }
    }

    #[tokio::test]
    async fn test_status_report_is_idempotent() {
        let store = Arc::new(MemoryCampaignStore::new());
        let reconciler = Reconciler::new(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Immediate, 2).await;
        start_campaign(store.clone(), &campaign).await;

        let item = store.next_pending_item(campaign.id).await.unwrap().unwrap();
        let first = reconciler.report_item_status(item.id, sent_report()).await.unwrap();
        assert_eq!(first.status, ItemStatus::Sent);

        let failed = ItemStatusReport {
            status: ItemStatus::Failed,
            error_message: Some("late".to_string()),
            sent_at: None,
            response_data: None,
        };
        let second = reconciler.report_item_status(item.id, failed).await.unwrap();
        assert_eq!(second.status, ItemStatus::Sent);
        assert_eq!(second.error_message, None);

        let campaign = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!((campaign.sent_count, campaign.failed_count), (1, 0));
        assert_eq!(campaign.status, CampaignStatus::Processing);
    }

    #[tokio::test]
    async fn test_last_report_finalizes_campaign() {
        let store = Arc::new(MemoryCampaignStore::new());
        let reconciler = Reconciler::new(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Immediate, 2).await;
        start_campaign(store.clone(), &campaign).await;

        while let Some(item) = store.next_pending_item(campaign.id).await.unwrap() {
            reconciler.report_item_status(item.id, sent_report()).await.unwrap();
        }

        let campaign = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!((campaign.sent_count, campaign.failed_count), (2, 0));
        assert!(campaign.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_finalize_recounts_before_completing() {
        let store = Arc::new(MemoryCampaignStore::new());
        let reconciler = Reconciler::new(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Immediate, 2).await;
        start_campaign(store.clone(), &campaign).await;

        let outcome = ItemOutcome::Failed {
            error: "rejected upstream".to_string(),
            response_data: None,
        };
        while let Some(item) = store.next_pending_item(campaign.id).await.unwrap() {
            store.finish_item(item.id, &outcome).await.unwrap().unwrap();
        }

        let status = reconciler.maybe_finalize(campaign.id).await.unwrap();
        assert_eq!(status, Some(CampaignStatus::Failed));

        let campaign = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!((campaign.sent_count, campaign.failed_count), (0, 2));
        assert_eq!(reconciler.maybe_finalize(campaign.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_report_rejects_pending_and_unknown() {
        let store = Arc::new(MemoryCampaignStore::new());
        let reconciler = Reconciler::new(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Immediate, 1).await;
        let item = store.next_pending_item(campaign.id).await.unwrap().unwrap();

        let pending = ItemStatusReport {
            status: ItemStatus::Pending,
            ..sent_report()
        };
        assert!(matches!(
            reconciler.report_item_status(item.id, pending).await,
            Err(CampaignError::Validation(_))
        ));
        assert!(matches!(
            reconciler.report_item_status(uuid::Uuid::new_v4(), sent_report()).await,
            Err(CampaignError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_counters() {
        let store = Arc::new(MemoryCampaignStore::new());
        let reconciler = Reconciler::new(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Immediate, 3).await;
        start_campaign(store.clone(), &campaign).await;

        assert!(matches!(
            reconciler.increment_counters(campaign.id, -1, 0).await,
            Err(CampaignError::Validation(_))
        ));

        let counters = reconciler.increment_counters(campaign.id, 1, 1).await.unwrap();
        assert_eq!((counters.sent_count, counters.failed_count), (1, 1));

        // Clamped to the recipient total, which also finishes the campaign.
        let counters = reconciler.increment_counters(campaign.id, 5, 0).await.unwrap();
        assert_eq!((counters.sent_count, counters.failed_count), (2, 1));
        let campaign = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);

        assert!(matches!(
            reconciler.increment_counters(uuid::Uuid::new_v4(), 1, 0).await,
            Err(CampaignError::NotFound(_))
        ));
    }
}
