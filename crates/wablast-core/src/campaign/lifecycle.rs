//! Campaign state machine
//!
//! ```text
//! draft -> scheduled -> processing -> completed | failed | cancelled
//!          scheduled <-> paused <-> processing
//! ```
//!
//! Every entry point (API, scheduler, worker, reconciliation) moves a campaign
//! through [`StateMachine`]. A transition is first planned against the loaded
//! row, then written with a guard on the status it was planned from, together
//! with its audit log entry. Losing the race to another writer yields `None`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use wablast_storage::models::{
    Campaign, CampaignPatch, CampaignStatus, NewScheduleLog, ScheduleAction, ScheduleType,
    TransitionGuard,
};
use wablast_storage::repository::CampaignStore;

use crate::error::{CampaignError, Result};

/// Attempts made by [`StateMachine::apply_latest`] before giving up
const MAX_ATTEMPTS: usize = 3;

/// A requested lifecycle change
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Submit a draft; immediate campaigns go straight to processing
    Schedule,
    /// Due scheduled campaign handed to a worker
    Start,
    Pause {
        until: Option<DateTime<Utc>>,
        reason: Option<String>,
    },
    Resume {
        reason: Option<String>,
    },
    Cancel {
        reason: Option<String>,
    },
    /// No pending items remain
    Complete,
    Fail {
        reason: String,
    },
    /// Take over a processing campaign with no progress since `stale_before`
    Reclaim {
        stale_before: DateTime<Utc>,
    },
}

impl Transition {
    /// Verb used in error messages
    pub fn verb(&self) -> &'static str {
        match self {
            Transition::Schedule => "schedule",
            Transition::Start => "start",
            Transition::Pause { .. } => "pause",
            Transition::Resume { .. } => "resume",
            Transition::Cancel { .. } => "cancel",
            Transition::Complete => "complete",
            Transition::Fail { .. } => "fail",
            Transition::Reclaim { .. } => "reclaim",
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            Transition::Pause { reason, .. }
            | Transition::Resume { reason }
            | Transition::Cancel { reason } => reason.clone(),
            Transition::Fail { reason } => Some(reason.clone()),
            _ => None,
        }
    }
}

/// A validated transition, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub guard: TransitionGuard,
    pub patch: CampaignPatch,
    pub action: ScheduleAction,
}

/// Status a resumed campaign returns to
pub fn resume_destination(campaign: &Campaign) -> CampaignStatus {
    if campaign.sent_count > 0 || campaign.schedule_type == ScheduleType::Immediate {
        CampaignStatus::Processing
    } else {
        CampaignStatus::Scheduled
    }
}

/// Validate `transition` against `campaign` and compute the write
pub fn plan(campaign: &Campaign, transition: &Transition, now: DateTime<Utc>) -> Result<Plan> {
    let invalid = || CampaignError::InvalidTransition {
        from: campaign.status,
        action: transition.verb(),
    };
    let guard = TransitionGuard::status(campaign.status);
    // Fields a transition leaves alone unless it says otherwise
    let keep = CampaignPatch {
        status: campaign.status,
        is_paused: campaign.is_paused,
        pause_until: campaign.pause_until,
        started_at: None,
        completed_at: campaign.completed_at,
    };

    let (patch, action) = match transition {
        Transition::Schedule => {
            if campaign.status != CampaignStatus::Draft {
                return Err(invalid());
            }
            match campaign.schedule_type {
                ScheduleType::Immediate => (
                    CampaignPatch {
                        status: CampaignStatus::Processing,
                        started_at: Some(now),
                        ..keep
                    },
                    ScheduleAction::Started,
                ),
                ScheduleType::Scheduled | ScheduleType::Recurring => {
                    if campaign.scheduled_at.is_none() {
                        return Err(CampaignError::Validation(format!(
                            "scheduled_at is required for {} campaigns",
                            campaign.schedule_type
                        )));
                    }
                    (
                        CampaignPatch {
                            status: CampaignStatus::Scheduled,
                            ..keep
                        },
                        ScheduleAction::Scheduled,
                    )
                }
            }
        }
        Transition::Start => {
            if campaign.status != CampaignStatus::Scheduled || campaign.is_paused {
                return Err(invalid());
            }
            (
                CampaignPatch {
                    status: CampaignStatus::Processing,
                    started_at: Some(now),
                    ..keep
                },
                ScheduleAction::Started,
            )
        }
        Transition::Pause { until, .. } => {
            if !matches!(
                campaign.status,
                CampaignStatus::Scheduled | CampaignStatus::Processing
            ) {
                return Err(invalid());
            }
            (
                CampaignPatch {
                    status: CampaignStatus::Paused,
                    is_paused: true,
                    pause_until: *until,
                    ..keep
                },
                ScheduleAction::Paused,
            )
        }
        Transition::Resume { .. } => {
            if !campaign.is_paused {
                return Err(CampaignError::NotPaused);
            }
            let status = resume_destination(campaign);
            (
                CampaignPatch {
                    status,
                    is_paused: false,
                    pause_until: None,
                    started_at: (status == CampaignStatus::Processing).then_some(now),
                    ..keep
                },
                ScheduleAction::Resumed,
            )
        }
        Transition::Cancel { .. } => {
            if campaign.status.is_terminal() {
                return Err(CampaignError::AlreadyFinalized(campaign.status));
            }
            (
                CampaignPatch {
                    status: CampaignStatus::Cancelled,
                    is_paused: false,
                    pause_until: None,
                    started_at: None,
                    completed_at: Some(now),
                },
                ScheduleAction::Cancelled,
            )
        }
        Transition::Complete => {
            if campaign.status != CampaignStatus::Processing {
                return Err(invalid());
            }
            let (status, action) = if campaign.sent_count == 0 && campaign.failed_count > 0 {
                (CampaignStatus::Failed, ScheduleAction::Failed)
            } else {
                (CampaignStatus::Completed, ScheduleAction::Completed)
            };
            (
                CampaignPatch {
                    status,
                    is_paused: false,
                    pause_until: None,
                    started_at: None,
                    completed_at: Some(now),
                },
                action,
            )
        }
        Transition::Fail { .. } => {
            if campaign.status.is_terminal() {
                return Err(CampaignError::AlreadyFinalized(campaign.status));
            }
            (
                CampaignPatch {
                    status: CampaignStatus::Failed,
                    is_paused: false,
                    pause_until: None,
                    started_at: None,
                    completed_at: Some(now),
                },
                ScheduleAction::Failed,
            )
        }
        Transition::Reclaim { stale_before } => {
            if campaign.status != CampaignStatus::Processing || campaign.is_paused {
                return Err(invalid());
            }
            return Ok(Plan {
                guard: TransitionGuard {
                    expected_status: CampaignStatus::Processing,
                    stale_before: Some(*stale_before),
                },
                patch: keep,
                action: ScheduleAction::Reclaimed,
            });
        }
    };

    Ok(Plan {
        guard,
        patch,
        action,
    })
}

/// Applies lifecycle transitions through the campaign store
#[derive(Clone)]
pub struct StateMachine {
    store: Arc<dyn CampaignStore>,
}

impl StateMachine {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    /// Plan and write `transition`; `None` if the row changed underneath
    pub async fn apply(
        &self,
        campaign: &Campaign,
        transition: &Transition,
    ) -> Result<Option<Campaign>> {
        let plan = plan(campaign, transition, Utc::now())?;
        let log = NewScheduleLog {
            campaign_id: campaign.id,
            tenant_id: campaign.tenant_id,
            action: plan.action,
            reason: transition.reason(),
            metadata: campaign.snapshot(),
        };

        let updated = self
            .store
            .transition(campaign.id, plan.guard, plan.patch, log)
            .await?;

        match &updated {
            Some(c) => info!(
                campaign_id = %c.id,
                tenant_id = %c.tenant_id,
                action = %plan.action,
                from = %campaign.status,
                to = %c.status,
                "Campaign transition"
            ),
            None => debug!(
                campaign_id = %campaign.id,
                action = %plan.action,
                "Campaign changed concurrently, transition skipped"
            ),
        }

        Ok(updated)
    }

    /// Apply `transition`, re-reading and re-validating after a lost race
    pub async fn apply_latest(
        &self,
        mut campaign: Campaign,
        transition: &Transition,
    ) -> Result<Campaign> {
        for _ in 0..MAX_ATTEMPTS {
            if let Some(updated) = self.apply(&campaign, transition).await? {
                return Ok(updated);
            }
            campaign = self
                .store
                .get_campaign(campaign.id)
                .await?
                .ok_or_else(|| CampaignError::campaign_not_found(campaign.id))?;
        }

        Err(CampaignError::InvalidTransition {
            from: campaign.status,
            action: transition.verb(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{campaign_fixture, create_campaign};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use wablast_storage::MemoryCampaignStore;

    fn with_status(status: CampaignStatus) -> Campaign {
        let mut campaign = campaign_fixture(ScheduleType::Scheduled);
        campaign.status = status;
        campaign
    }

    #[test]
    fn test_schedule_requires_draft_and_time() {
        let now = Utc::now();
        let campaign = with_status(CampaignStatus::Draft);
        let plan = plan(&campaign, &Transition::Schedule, now).unwrap();
        assert_eq!(plan.patch.status, CampaignStatus::Scheduled);
        assert_eq!(plan.action, ScheduleAction::Scheduled);

        let mut missing = campaign.clone();
        missing.scheduled_at = None;
        assert!(matches!(
            super::plan(&missing, &Transition::Schedule, now),
            Err(CampaignError::Validation(_))
        ));

        let scheduled = with_status(CampaignStatus::Scheduled);
        assert!(matches!(
            super::plan(&scheduled, &Transition::Schedule, now),
            Err(CampaignError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_schedule_immediate_starts_processing() {
        let now = Utc::now();
        let mut campaign = campaign_fixture(ScheduleType::Immediate);
        campaign.scheduled_at = None;
        let plan = plan(&campaign, &Transition::Schedule, now).unwrap();
        assert_eq!(plan.patch.status, CampaignStatus::Processing);
        assert_eq!(plan.patch.started_at, Some(now));
        assert_eq!(plan.action, ScheduleAction::Started);
    }

    #[test]
    fn test_pause_only_from_scheduled_or_processing() {
        let now = Utc::now();
        let until = now + Duration::hours(1);
        let pause = Transition::Pause {
            until: Some(until),
            reason: None,
        };

        for status in [CampaignStatus::Scheduled, CampaignStatus::Processing] {
            let plan = plan(&with_status(status), &pause, now).unwrap();
            assert_eq!(plan.patch.status, CampaignStatus::Paused);
            assert!(plan.patch.is_paused);
            assert_eq!(plan.patch.pause_until, Some(until));
            assert_eq!(plan.guard.expected_status, status);
        }

        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Cancelled,
        ] {
            assert!(matches!(
                plan(&with_status(status), &pause, now),
                Err(CampaignError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_resume_destination() {
        let now = Utc::now();
        let resume = Transition::Resume { reason: None };

        let mut campaign = with_status(CampaignStatus::Paused);
        campaign.is_paused = true;
        campaign.pause_until = Some(now);
        let plan_scheduled = plan(&campaign, &resume, now).unwrap();
        assert_eq!(plan_scheduled.patch.status, CampaignStatus::Scheduled);
        assert_eq!(plan_scheduled.patch.pause_until, None);
        assert!(!plan_scheduled.patch.is_paused);

        campaign.sent_count = 2;
        assert_eq!(
            plan(&campaign, &resume, now).unwrap().patch.status,
            CampaignStatus::Processing
        );

        let mut immediate = campaign_fixture(ScheduleType::Immediate);
        immediate.status = CampaignStatus::Paused;
        immediate.is_paused = true;
        assert_eq!(
            plan(&immediate, &resume, now).unwrap().patch.status,
            CampaignStatus::Processing
        );

        assert!(matches!(
            plan(&with_status(CampaignStatus::Processing), &resume, now),
            Err(CampaignError::NotPaused)
        ));
    }

    #[test]
    fn test_cancel_rules() {
        let now = Utc::now();
        let cancel = Transition::Cancel { reason: None };

        let mut paused = with_status(CampaignStatus::Paused);
        paused.is_paused = true;
        paused.pause_until = Some(now);
        let plan = plan(&paused, &cancel, now).unwrap();
        assert_eq!(plan.patch.status, CampaignStatus::Cancelled);
        assert!(!plan.patch.is_paused);
        assert_eq!(plan.patch.pause_until, None);
        assert_eq!(plan.patch.completed_at, Some(now));

        for status in [
            CampaignStatus::Completed,
            CampaignStatus::Failed,
            CampaignStatus::Cancelled,
        ] {
            assert!(matches!(
                super::plan(&with_status(status), &cancel, now),
                Err(CampaignError::AlreadyFinalized(s)) if s == status
            ));
        }
    }

    #[test]
    fn test_complete_picks_outcome() {
        let now = Utc::now();
        let mut campaign = with_status(CampaignStatus::Processing);
        campaign.total_recipients = 3;

        campaign.failed_count = 3;
        assert_eq!(
            plan(&campaign, &Transition::Complete, now).unwrap().patch.status,
            CampaignStatus::Failed
        );

        campaign.sent_count = 1;
        campaign.failed_count = 2;
        assert_eq!(
            plan(&campaign, &Transition::Complete, now).unwrap().patch.status,
            CampaignStatus::Completed
        );

        campaign.sent_count = 0;
        campaign.failed_count = 0;
        assert_eq!(
            plan(&campaign, &Transition::Complete, now).unwrap().patch.status,
            CampaignStatus::Completed
        );

        assert!(plan(&with_status(CampaignStatus::Paused), &Transition::Complete, now).is_err());
    }

    #[test]
    fn test_reclaim_guards_on_staleness() {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(15);
        let plan = plan(
            &with_status(CampaignStatus::Processing),
            &Transition::Reclaim {
                stale_before: cutoff,
            },
            now,
        )
        .unwrap();
        assert_eq!(plan.guard.stale_before, Some(cutoff));
        assert_eq!(plan.patch.status, CampaignStatus::Processing);
        assert_eq!(plan.action, ScheduleAction::Reclaimed);
    }

    #[tokio::test]
    async fn test_apply_writes_log_with_reason() {
        let store = Arc::new(MemoryCampaignStore::new());
        let machine = StateMachine::new(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Scheduled, 2).await;

        let scheduled = machine
            .apply(&campaign, &Transition::Schedule)
            .await
            .unwrap()
            .unwrap();
        let paused = machine
            .apply(
                &scheduled,
                &Transition::Pause {
                    until: None,
                    reason: Some("maintenance".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paused.status, CampaignStatus::Paused);

        // Stale copy: the row is no longer scheduled.
        let lost = machine
            .apply(&scheduled, &Transition::Cancel { reason: None })
            .await
            .unwrap();
        assert!(lost.is_none());

        let logs = store.list_logs(campaign.id).await.unwrap();
        let actions: Vec<_> = logs.iter().map(|l| l.action).collect();
        assert_eq!(actions, vec![ScheduleAction::Scheduled, ScheduleAction::Paused]);
        assert_eq!(logs[1].reason.as_deref(), Some("maintenance"));
        assert_eq!(logs[1].metadata["status"], "scheduled");
    }

    #[tokio::test]
    async fn test_apply_latest_revalidates() {
        let store = Arc::new(MemoryCampaignStore::new());
        let machine = StateMachine::new(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Scheduled, 1).await;
        let scheduled = machine
            .apply_latest(campaign.clone(), &Transition::Schedule)
            .await
            .unwrap();

        // Cancelling from a stale draft copy re-reads and succeeds.
        let cancelled = machine
            .apply_latest(campaign.clone(), &Transition::Cancel { reason: None })
            .await
            .unwrap();
        assert_eq!(cancelled.status, CampaignStatus::Cancelled);

        let err = machine
            .apply_latest(scheduled, &Transition::Cancel { reason: None })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CampaignError::AlreadyFinalized(CampaignStatus::Cancelled)
        ));
    }
}
