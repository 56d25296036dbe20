//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use wablast_common::types::{CampaignId, CampaignItemId, ScheduleLogId, TenantId};

/// Generates `as_str`, `Display`, `FromStr` and `TryFrom<String>` for a
/// snake_case TEXT-backed enum.
macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!(concat!("Invalid ", $label, ": {}"), s)),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

/// How a campaign is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Immediate,
    Scheduled,
    Recurring,
}

text_enum!(ScheduleType, "schedule type", {
    Immediate => "immediate",
    Scheduled => "scheduled",
    Recurring => "recurring",
});

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(CampaignStatus, "campaign status", {
    Draft => "draft",
    Scheduled => "scheduled",
    Processing => "processing",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl CampaignStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }
}

/// Campaign item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Sent,
    Failed,
}

text_enum!(ItemStatus, "item status", {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
});

/// Audit trail action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    Scheduled,
    Started,
    Paused,
    Resumed,
    Cancelled,
    Completed,
    Failed,
    Reclaimed,
}

text_enum!(ScheduleAction, "schedule action", {
    Scheduled => "scheduled",
    Started => "started",
    Paused => "paused",
    Resumed => "resumed",
    Cancelled => "cancelled",
    Completed => "completed",
    Failed => "failed",
    Reclaimed => "reclaimed",
});

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub parent_campaign_id: Option<CampaignId>,
    pub name: String,
    pub message: String,
    pub media_url: Option<String>,
    pub buttons: Option<serde_json::Value>,
    pub instance_id: String,
    #[sqlx(try_from = "String")]
    pub schedule_type: ScheduleType,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recurrence_pattern: Option<String>,
    pub timezone: String,
    pub min_delay: i32,
    pub max_delay: i32,
    pub throttle_enabled: bool,
    pub throttle_rate: i32,
    pub throttle_delay: i32,
    pub is_paused: bool,
    pub pause_until: Option<DateTime<Utc>>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients == 0 {
            0.0
        } else {
            ((self.sent_count + self.failed_count) as f64 / self.total_recipients as f64) * 100.0
        }
    }

    /// Items attempted so far, as seen by the counters
    pub fn processed_count(&self) -> i32 {
        self.sent_count + self.failed_count
    }

    /// Throttle settings for the rate controller
    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            throttle_enabled: self.throttle_enabled,
            throttle_rate: self.throttle_rate,
            throttle_delay: self.throttle_delay,
        }
    }

    /// Content handed to the gateway for each recipient
    pub fn payload(&self) -> MessagePayload {
        MessagePayload {
            instance_id: self.instance_id.clone(),
            message: self.message.clone(),
            media_url: self.media_url.clone(),
            buttons: self.buttons.clone(),
        }
    }

    pub fn counters(&self) -> CampaignCounters {
        CampaignCounters {
            campaign_id: self.id,
            total_recipients: self.total_recipients,
            sent_count: self.sent_count,
            failed_count: self.failed_count,
        }
    }

    /// State captured in the audit log before a transition
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status,
            "is_paused": self.is_paused,
            "pause_until": self.pause_until,
            "scheduled_at": self.scheduled_at,
            "schedule_type": self.schedule_type,
            "total_recipients": self.total_recipients,
            "sent_count": self.sent_count,
            "failed_count": self.failed_count,
        })
    }
}

/// Per-message delay and batch throttle settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub min_delay: i32,
    pub max_delay: i32,
    pub throttle_enabled: bool,
    pub throttle_rate: i32,
    pub throttle_delay: i32,
}

/// Message content sent to one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub instance_id: String,
    pub message: String,
    pub media_url: Option<String>,
    pub buttons: Option<serde_json::Value>,
}

/// Campaign progress counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub campaign_id: CampaignId,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub tenant_id: TenantId,
    pub parent_campaign_id: Option<CampaignId>,
    pub name: String,
    pub message: String,
    pub media_url: Option<String>,
    pub buttons: Option<serde_json::Value>,
    pub instance_id: String,
    pub schedule_type: ScheduleType,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recurrence_pattern: Option<String>,
    pub timezone: Option<String>,
    pub min_delay: i32,
    pub max_delay: i32,
    pub throttle_enabled: bool,
    pub throttle_rate: i32,
    pub throttle_delay: i32,
}

impl CreateCampaign {
    /// Input for the next run of a recurring campaign
    pub fn next_run_of(parent: &Campaign, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: parent.tenant_id,
            parent_campaign_id: Some(parent.id),
            name: parent.name.clone(),
            message: parent.message.clone(),
            media_url: parent.media_url.clone(),
            buttons: parent.buttons.clone(),
            instance_id: parent.instance_id.clone(),
            schedule_type: parent.schedule_type,
            scheduled_at: Some(scheduled_at),
            recurrence_pattern: parent.recurrence_pattern.clone(),
            timezone: Some(parent.timezone.clone()),
            min_delay: parent.min_delay,
            max_delay: parent.max_delay,
            throttle_enabled: parent.throttle_enabled,
            throttle_rate: parent.throttle_rate,
            throttle_delay: parent.throttle_delay,
        }
    }
}

/// Lifecycle fields written by a state transition
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignPatch {
    pub status: CampaignStatus,
    pub is_paused: bool,
    pub pause_until: Option<DateTime<Utc>>,
    /// Only written when the campaign has not started yet
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Precondition a transition re-checks at write time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionGuard {
    pub expected_status: CampaignStatus,
    /// Also require `updated_at < stale_before`
    pub stale_before: Option<DateTime<Utc>>,
}

impl TransitionGuard {
    pub fn status(expected_status: CampaignStatus) -> Self {
        Self {
            expected_status,
            stale_before: None,
        }
    }

    pub fn holds_for(&self, campaign: &Campaign) -> bool {
        campaign.status == self.expected_status
            && self
                .stale_before
                .map_or(true, |cutoff| campaign.updated_at < cutoff)
    }
}

/// Campaign item model (one per recipient)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignItem {
    pub id: CampaignItemId,
    pub campaign_id: CampaignId,
    pub seq: i64,
    pub recipient: String,
    #[sqlx(try_from = "String")]
    pub status: ItemStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub response_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal result written to a pending item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Sent {
        sent_at: DateTime<Utc>,
        response_data: Option<serde_json::Value>,
    },
    Failed {
        error: String,
        response_data: Option<serde_json::Value>,
    },
}

impl ItemOutcome {
    pub fn status(&self) -> ItemStatus {
        match self {
            ItemOutcome::Sent { .. } => ItemStatus::Sent,
            ItemOutcome::Failed { .. } => ItemStatus::Failed,
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ItemOutcome::Sent { sent_at, .. } => Some(*sent_at),
            ItemOutcome::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ItemOutcome::Sent { .. } => None,
            ItemOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn response_data(&self) -> Option<&serde_json::Value> {
        match self {
            ItemOutcome::Sent { response_data, .. } | ItemOutcome::Failed { response_data, .. } => {
                response_data.as_ref()
            }
        }
    }
}

/// Item tallies for a campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ItemCounts {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
}

/// Counter adjustment applied atomically to a campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub sent: i32,
    pub failed: i32,
}

/// Schedule log entry (append-only audit record)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleLogEntry {
    pub id: ScheduleLogId,
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    #[sqlx(try_from = "String")]
    pub action: ScheduleAction,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// New schedule log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduleLog {
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub action: ScheduleAction,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewScheduleLog {
    /// Entry for a recurring run created directly as scheduled
    pub fn next_run(campaign: &Campaign, parent_id: CampaignId) -> Self {
        Self {
            campaign_id: campaign.id,
            tenant_id: campaign.tenant_id,
            action: ScheduleAction::Scheduled,
            reason: Some("Next recurring run".to_string()),
            metadata: serde_json::json!({ "parent_campaign_id": parent_id }),
        }
    }
}

/// Add increments to recorded counters while keeping `sent + failed <= total`.
///
/// Only the increments are trimmed, sent first. Recorded counts never go down.
pub fn clamp_counters(
    total: i32,
    (sent, failed): (i32, i32),
    (add_sent, add_failed): (i32, i32),
) -> (i32, i32) {
    let room = total.saturating_sub(sent).saturating_sub(failed).max(0);
    let add_sent = add_sent.clamp(0, room);
    let add_failed = add_failed.clamp(0, room - add_sent);
    (sent + add_sent, failed + add_failed)
}
