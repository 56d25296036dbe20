//! Dispatch worker - drains one campaign's recipient queue

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wablast_common::types::CampaignId;
use wablast_storage::models::{Campaign, CampaignItem, CampaignStatus, CounterDelta, ItemOutcome};
use wablast_storage::repository::{CampaignStore, CreditLedger};

use super::rate_controller::next_delay;
use super::reconcile::{CounterUpdate, Reconciler};
use crate::error::{CampaignError, Result};
use crate::gateway::MessageGateway;

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Queue drained; the campaign reached this terminal status
    Finished(CampaignStatus),
    /// Campaign was paused
    Paused,
    /// Campaign left `processing` for another reason (cancelled, failed)
    Stopped(CampaignStatus),
    /// Shutdown requested
    Shutdown,
}

/// Sends a campaign's pending items one at a time, in creation order
#[derive(Clone)]
pub struct DispatchWorker {
    store: Arc<dyn CampaignStore>,
    gateway: Arc<dyn MessageGateway>,
    credits: Arc<dyn CreditLedger>,
    reconciler: Reconciler,
    gateway_timeout: Duration,
    shutdown: CancellationToken,
}

impl DispatchWorker {
    /// Create a new dispatch worker
    pub fn new(
        store: Arc<dyn CampaignStore>,
        gateway: Arc<dyn MessageGateway>,
        credits: Arc<dyn CreditLedger>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(store.clone()),
            store,
            gateway,
            credits,
            gateway_timeout: Duration::from_secs(30),
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the per-call gateway timeout
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Set the token that interrupts waits and sends
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the queue is drained, the campaign leaves `processing`,
    /// or shutdown is requested. Store errors end the run with the campaign
    /// still `processing`.
    pub async fn run(&self, campaign_id: CampaignId) -> Result<WorkerExit> {
        info!(campaign_id = %campaign_id, "Dispatch worker started");

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(WorkerExit::Shutdown);
            }

            let campaign = self
                .store
                .get_campaign(campaign_id)
                .await?
                .ok_or_else(|| CampaignError::campaign_not_found(campaign_id))?;

            if campaign.is_paused {
                info!(campaign_id = %campaign_id, "Campaign paused, worker stopping");
                return Ok(WorkerExit::Paused);
            }
            if campaign.status != CampaignStatus::Processing {
                info!(
                    campaign_id = %campaign_id,
                    status = %campaign.status,
                    "Campaign no longer processing, worker stopping"
                );
                return Ok(WorkerExit::Stopped(campaign.status));
            }

            let Some(item) = self.store.next_pending_item(campaign_id).await? else {
                let current = match self.reconciler.complete(campaign_id).await? {
                    Some(done) => Some(done),
                    None => self.store.get_campaign(campaign_id).await?,
                };
                let current = current.unwrap_or(campaign);
                info!(
                    campaign_id = %campaign_id,
                    status = %current.status,
                    sent = current.sent_count,
                    failed = current.failed_count,
                    "Campaign queue drained"
                );
                return Ok(WorkerExit::Finished(current.status));
            };

            let delay = next_delay(&campaign.throttle(), campaign.processed_count());
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(WorkerExit::Shutdown),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(WorkerExit::Shutdown),
                outcome = self.send_item(&campaign, &item) => outcome,
            };

            self.record(&campaign, &item, outcome).await?;
        }
    }

    async fn send_item(&self, campaign: &Campaign, item: &CampaignItem) -> ItemOutcome {
        let payload = campaign.payload();
        let call = self.gateway.send(&item.recipient, &payload);

        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(Ok(receipt)) => {
                let response_data = receipt.response.or_else(|| {
                    receipt
                        .provider_message_id
                        .map(|id| serde_json::json!({ "provider_message_id": id }))
                });
                ItemOutcome::Sent {
                    sent_at: Utc::now(),
                    response_data,
                }
            }
            Ok(Err(err)) => ItemOutcome::Failed {
                error: err.message().to_string(),
                response_data: Some(serde_json::json!({ "transient": err.is_transient() })),
            },
            Err(_) => ItemOutcome::Failed {
                error: format!(
                    "Gateway timed out after {}s",
                    self.gateway_timeout.as_secs_f64()
                ),
                response_data: None,
            },
        }
    }

    async fn record(
        &self,
        campaign: &Campaign,
        item: &CampaignItem,
        outcome: ItemOutcome,
    ) -> Result<()> {
        let delta = match outcome {
            ItemOutcome::Sent { .. } => CounterDelta { sent: 1, failed: 0 },
            ItemOutcome::Failed { .. } => CounterDelta { sent: 0, failed: 1 },
        };

        if self.store.finish_item(item.id, &outcome).await?.is_none() {
            debug!(item_id = %item.id, "Item finished elsewhere, counters untouched");
            return Ok(());
        }
        self.reconciler
            .apply(campaign.id, CounterUpdate::Delta(delta))
            .await?;

        match &outcome {
            ItemOutcome::Sent { .. } => {
                debug!(campaign_id = %campaign.id, item_id = %item.id, recipient = %item.recipient, "Message sent");
                if let Err(e) = self.credits.decrement(campaign.tenant_id, 1).await {
                    warn!(
                        tenant_id = %campaign.tenant_id,
                        campaign_id = %campaign.id,
                        "Failed to decrement tenant credit: {}",
                        e
                    );
                }
            }
            ItemOutcome::Failed { error, .. } => {
                debug!(campaign_id = %campaign.id, item_id = %item.id, recipient = %item.recipient, error = %error, "Message failed");
            }
        }

        Ok(())
    }
}
