//! Shared test fixtures

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;
use wablast_common::types::RecipientAddress;
use wablast_storage::models::{Campaign, CampaignStatus, CreateCampaign, MessagePayload, ScheduleType};
use wablast_storage::repository::CampaignStore;
use wablast_storage::MemoryCampaignStore;

use crate::campaign::lifecycle::{StateMachine, Transition};
use crate::gateway::{GatewayError, GatewayReceipt, MessageGateway};

/// Gateway answering from a script, then with a fixed fallback
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<GatewayReceipt, GatewayError>>>,
    fallback: Result<GatewayReceipt, GatewayError>,
    sent_to: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(GatewayReceipt {
            provider_message_id: Some("wamid.test".to_string()),
            response: None,
        }))
    }

    pub fn failing(err: GatewayError) -> Self {
        Self::with_fallback(Err(err))
    }

    pub fn scripted(script: Vec<Result<GatewayReceipt, GatewayError>>) -> Self {
        let gateway = Self::succeeding();
        Self {
            script: Mutex::new(script.into()),
            ..gateway
        }
    }

    fn with_fallback(fallback: Result<GatewayReceipt, GatewayError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            sent_to: Mutex::new(Vec::new()),
        }
    }

    /// Recipients in call order
    pub async fn recipients(&self) -> Vec<String> {
        self.sent_to.lock().await.clone()
    }
}

#[async_trait]
impl MessageGateway for ScriptedGateway {
    async fn send(
        &self,
        recipient: &str,
        _payload: &MessagePayload,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.sent_to.lock().await.push(recipient.to_string());
        match self.script.lock().await.pop_front() {
            Some(answer) => answer,
            None => self.fallback.clone(),
        }
    }
}

/// Gateway that never answers
pub struct HangingGateway;

#[async_trait]
impl MessageGateway for HangingGateway {
    async fn send(
        &self,
        _recipient: &str,
        _payload: &MessagePayload,
    ) -> Result<GatewayReceipt, GatewayError> {
        std::future::pending().await
    }
}

pub fn recipient(n: usize) -> String {
    format!("55119{:08}", n)
}

pub fn create_input(schedule_type: ScheduleType) -> CreateCampaign {
    let timed = schedule_type != ScheduleType::Immediate;
    CreateCampaign {
        tenant_id: Uuid::new_v4(),
        parent_campaign_id: None,
        name: "Spring promo".to_string(),
        message: "Hi! Our spring sale starts today.".to_string(),
        media_url: None,
        buttons: None,
        instance_id: "instance-1".to_string(),
        schedule_type,
        scheduled_at: timed.then(|| Utc::now() - Duration::minutes(1)),
        recurrence_pattern: (schedule_type == ScheduleType::Recurring).then(|| "daily".to_string()),
        timezone: None,
        min_delay: 1,
        max_delay: 5,
        throttle_enabled: false,
        throttle_rate: 0,
        throttle_delay: 0,
    }
}

/// Draft campaign value, not persisted
pub fn campaign_fixture(schedule_type: ScheduleType) -> Campaign {
    let input = create_input(schedule_type);
    let now = Utc::now();
    Campaign {
        id: Uuid::new_v4(),
        tenant_id: input.tenant_id,
        parent_campaign_id: None,
        name: input.name,
        message: input.message,
        media_url: None,
        buttons: None,
        instance_id: input.instance_id,
        schedule_type,
        scheduled_at: input.scheduled_at,
        recurrence_pattern: input.recurrence_pattern,
        timezone: "UTC".to_string(),
        min_delay: input.min_delay,
        max_delay: input.max_delay,
        throttle_enabled: false,
        throttle_rate: 0,
        throttle_delay: 0,
        is_paused: false,
        pause_until: None,
        total_recipients: 3,
        sent_count: 0,
        failed_count: 0,
        status: CampaignStatus::Draft,
        started_at: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Persist a draft campaign with `n` recipients
pub async fn create_campaign(
    store: &dyn CampaignStore,
    schedule_type: ScheduleType,
    n: usize,
) -> Campaign {
    let recipients: Vec<RecipientAddress> = (1..=n)
        .map(|i| RecipientAddress::parse(&recipient(i)).unwrap())
        .collect();
    store
        .create_campaign(create_input(schedule_type), &recipients)
        .await
        .unwrap()
}

/// Drive a draft campaign into `processing` without launching a worker
pub async fn start_campaign(store: Arc<MemoryCampaignStore>, campaign: &Campaign) -> Campaign {
    let machine = StateMachine::new(store);
    let scheduled = machine
        .apply(campaign, &Transition::Schedule)
        .await
        .unwrap()
        .unwrap();
    if scheduled.status == CampaignStatus::Processing {
        return scheduled;
    }
    machine
        .apply(&scheduled, &Transition::Start)
        .await
        .unwrap()
        .unwrap()
}
