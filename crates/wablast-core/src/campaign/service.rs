//! Campaign service - operator and executor entry points

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use wablast_common::types::{normalize_recipients, CampaignId, CampaignItemId, TenantId};
use wablast_storage::models::{
    Campaign, CampaignCounters, CampaignItem, CampaignStatus, CreateCampaign, ScheduleLogEntry,
    ScheduleType,
};
use wablast_storage::repository::CampaignStore;

use super::dispatcher::Dispatcher;
use super::lifecycle::{StateMachine, Transition};
use super::reconcile::{ItemStatusReport, Reconciler};
use super::recurrence::RecurrenceEvaluator;
use crate::error::{CampaignError, Result};

/// Campaign submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub buttons: Option<serde_json::Value>,
    pub instance_id: String,
    #[serde(default = "default_schedule_type")]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub min_delay: Option<i32>,
    #[serde(default)]
    pub max_delay: Option<i32>,
    #[serde(default)]
    pub throttle_enabled: bool,
    #[serde(default)]
    pub throttle_rate: i32,
    #[serde(default)]
    pub throttle_delay: i32,
    /// Raw uploaded list; normalized and deduplicated on submission
    pub recipients: Vec<String>,
}

fn default_schedule_type() -> ScheduleType {
    ScheduleType::Immediate
}

/// Newly created campaign plus the entries that could not be parsed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignCreated {
    pub campaign: Campaign,
    pub rejected_recipients: Vec<String>,
}

/// Campaign service
pub struct CampaignService {
    store: Arc<dyn CampaignStore>,
    machine: StateMachine,
    reconciler: Reconciler,
    dispatcher: Arc<Dispatcher>,
    recurrence: Arc<dyn RecurrenceEvaluator>,
    default_min_delay: i32,
    default_max_delay: i32,
}

impl CampaignService {
    /// Create a new campaign service
    pub fn new(
        store: Arc<dyn CampaignStore>,
        dispatcher: Arc<Dispatcher>,
        recurrence: Arc<dyn RecurrenceEvaluator>,
    ) -> Self {
        Self {
            machine: StateMachine::new(store.clone()),
            reconciler: Reconciler::new(store.clone()),
            store,
            dispatcher,
            recurrence,
            default_min_delay: 1,
            default_max_delay: 5,
        }
    }

    /// Delays used when a submission does not set them
    pub fn with_default_delays(mut self, min_delay: i32, max_delay: i32) -> Self {
        self.default_min_delay = min_delay;
        self.default_max_delay = max_delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    /// Create a draft campaign with one pending item per unique recipient
    pub async fn create_campaign(
        &self,
        tenant_id: TenantId,
        request: CreateCampaignRequest,
    ) -> Result<CampaignCreated> {
        let input = self.validate(tenant_id, &request)?;

        let (recipients, rejected) = normalize_recipients(&request.recipients);
        if recipients.is_empty() {
            return Err(CampaignError::Validation(
                "Recipient list contains no valid recipients".to_string(),
            ));
        }

        let campaign = self.store.create_campaign(input, &recipients).await?;
        info!(
            campaign_id = %campaign.id,
            tenant_id = %tenant_id,
            recipients = campaign.total_recipients,
            rejected = rejected.len(),
            "Campaign created"
        );

        Ok(CampaignCreated {
            campaign,
            rejected_recipients: rejected,
        })
    }

    fn validate(&self, tenant_id: TenantId, request: &CreateCampaignRequest) -> Result<CreateCampaign> {
        let required = |value: &str, field: &str| {
            if value.trim().is_empty() {
                Err(CampaignError::Validation(format!("{} is required", field)))
            } else {
                Ok(())
            }
        };
        required(&request.name, "name")?;
        required(&request.message, "message")?;
        required(&request.instance_id, "instance_id")?;

        let min_delay = request.min_delay.unwrap_or(self.default_min_delay);
        let max_delay = request.max_delay.unwrap_or(self.default_max_delay);
        for (field, value) in [
            ("min_delay", min_delay),
            ("max_delay", max_delay),
            ("throttle_rate", request.throttle_rate),
            ("throttle_delay", request.throttle_delay),
        ] {
            if value < 0 {
                return Err(CampaignError::Validation(format!("{} must not be negative", field)));
            }
        }

        if request.schedule_type != ScheduleType::Immediate && request.scheduled_at.is_none() {
            return Err(CampaignError::Validation(format!(
                "scheduled_at is required for {} campaigns",
                request.schedule_type
            )));
        }
        if request.schedule_type == ScheduleType::Recurring {
            let pattern = request.recurrence_pattern.as_deref().ok_or_else(|| {
                CampaignError::Validation("recurrence_pattern is required for recurring campaigns".to_string())
            })?;
            self.recurrence.validate(pattern)?;
        }

        let timezone = request
            .timezone
            .as_deref()
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .map(str::to_string);

        Ok(CreateCampaign {
            tenant_id,
            parent_campaign_id: None,
            name: request.name.trim().to_string(),
            message: request.message.clone(),
            media_url: request.media_url.clone(),
            buttons: request.buttons.clone(),
            instance_id: request.instance_id.trim().to_string(),
            schedule_type: request.schedule_type,
            scheduled_at: request.scheduled_at,
            recurrence_pattern: request.recurrence_pattern.clone(),
            timezone,
            min_delay,
            max_delay,
            throttle_enabled: request.throttle_enabled,
            throttle_rate: request.throttle_rate,
            throttle_delay: request.throttle_delay,
        })
    }

    /// Get a campaign owned by `tenant_id`
    pub async fn get_campaign(&self, tenant_id: TenantId, campaign_id: CampaignId) -> Result<Campaign> {
        self.store
            .get_campaign_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or_else(|| CampaignError::campaign_not_found(campaign_id))
    }

    /// Audit trail of a campaign
    pub async fn list_logs(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Vec<ScheduleLogEntry>> {
        let campaign = self.get_campaign(tenant_id, campaign_id).await?;
        Ok(self.store.list_logs(campaign.id).await?)
    }

    /// Submit a draft. Immediate campaigns start dispatching right away.
    pub async fn schedule_campaign(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign> {
        let campaign = self.get_campaign(tenant_id, campaign_id).await?;
        let campaign = self.machine.apply_latest(campaign, &Transition::Schedule).await?;
        self.launch_if_processing(&campaign);
        Ok(campaign)
    }

    /// Pause a scheduled or processing campaign, optionally until a time
    pub async fn pause_campaign(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        until: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<Campaign> {
        let campaign = self.get_campaign(tenant_id, campaign_id).await?;
        self.machine
            .apply_latest(campaign, &Transition::Pause { until, reason })
            .await
    }

    /// Resume a paused campaign
    pub async fn resume_campaign(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        reason: Option<String>,
    ) -> Result<Campaign> {
        let campaign = self.get_campaign(tenant_id, campaign_id).await?;
        let campaign = self
            .machine
            .apply_latest(campaign, &Transition::Resume { reason })
            .await?;
        self.launch_if_processing(&campaign);
        Ok(campaign)
    }

    /// Cancel a campaign that has not finished; its items are kept
    pub async fn cancel_campaign(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        reason: Option<String>,
    ) -> Result<Campaign> {
        let campaign = self.get_campaign(tenant_id, campaign_id).await?;
        self.machine
            .apply_latest(campaign, &Transition::Cancel { reason })
            .await
    }

    /// Executor report of an item's terminal status
    pub async fn update_item_status(
        &self,
        item_id: CampaignItemId,
        report: ItemStatusReport,
    ) -> Result<CampaignItem> {
        self.reconciler.report_item_status(item_id, report).await
    }

    /// Executor counter increment
    pub async fn increment_counters(
        &self,
        campaign_id: CampaignId,
        sent: i32,
        failed: i32,
    ) -> Result<CampaignCounters> {
        self.reconciler
            .increment_counters(campaign_id, sent, failed)
            .await
    }

    fn launch_if_processing(&self, campaign: &Campaign) {
        if campaign.status == CampaignStatus::Processing && !campaign.is_paused {
            self.dispatcher.launch(campaign.id);
        }
    }
}
