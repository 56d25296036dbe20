//! Scheduler loop - promotes due campaigns, ends pause windows and reclaims
//! stalled campaigns

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wablast_common::types::{CampaignId, RecipientAddress};
use wablast_storage::models::{Campaign, CampaignStatus, CreateCampaign, ScheduleType};
use wablast_storage::repository::CampaignStore;

use super::dispatcher::Dispatcher;
use super::lifecycle::{StateMachine, Transition};
use super::recurrence::RecurrenceEvaluator;
use crate::error::{CampaignError, Result};

/// Error recorded for one campaign (or a whole scan) during a poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollError {
    pub campaign_id: Option<CampaignId>,
    pub message: String,
}

/// What a poll did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollSummary {
    /// Due campaigns moved to processing
    pub processed: usize,
    /// Expired pauses resumed
    pub resumed: usize,
    /// Stalled campaigns reclaimed
    pub reclaimed: usize,
    pub errors: Vec<PollError>,
}

impl PollSummary {
    fn record(&mut self, campaign_id: Option<CampaignId>, err: &CampaignError) {
        self.errors.push(PollError {
            campaign_id,
            message: err.to_string(),
        });
    }
}

/// Campaign scheduler
pub struct Scheduler {
    store: Arc<dyn CampaignStore>,
    machine: StateMachine,
    dispatcher: Arc<Dispatcher>,
    recurrence: Arc<dyn RecurrenceEvaluator>,
    /// Campaigns handled per scan per poll
    batch_limit: i64,
    /// Processing campaigns idle this long are reclaimed
    stalled_after: chrono::Duration,
    /// Interval between polls when driven internally
    poll_interval: Duration,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        store: Arc<dyn CampaignStore>,
        dispatcher: Arc<Dispatcher>,
        recurrence: Arc<dyn RecurrenceEvaluator>,
    ) -> Self {
        Self {
            machine: StateMachine::new(store.clone()),
            store,
            dispatcher,
            recurrence,
            batch_limit: 10,
            stalled_after: chrono::Duration::minutes(15),
            poll_interval: Duration::from_secs(60),
        }
    }

    /// Set batch limit
    pub fn with_batch_limit(mut self, limit: i64) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Set the stalled-campaign threshold
    pub fn with_stalled_after(mut self, after: Duration) -> Self {
        self.stalled_after =
            chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::minutes(15));
        self
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Poll the store once
    pub async fn poll(&self) -> PollSummary {
        self.poll_at(Utc::now()).await
    }

    /// Poll the store once as of `now`
    pub async fn poll_at(&self, now: DateTime<Utc>) -> PollSummary {
        let mut summary = PollSummary::default();

        self.start_due(now, &mut summary).await;
        self.resume_expired(now, &mut summary).await;
        self.reap_stalled(now, &mut summary).await;

        if summary.processed + summary.resumed + summary.reclaimed > 0 || !summary.errors.is_empty() {
            info!(
                processed = summary.processed,
                resumed = summary.resumed,
                reclaimed = summary.reclaimed,
                errors = summary.errors.len(),
                "Scheduler poll completed"
            );
        } else {
            debug!("Scheduler poll found nothing to do");
        }

        summary
    }

    /// Poll on an interval until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Campaign scheduler started (batch: {}, interval: {}s)",
            self.batch_limit,
            self.poll_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }

        info!("Campaign scheduler stopped");
    }

    async fn start_due(&self, now: DateTime<Utc>, summary: &mut PollSummary) {
        let due = match self.store.list_due(now, self.batch_limit).await {
            Ok(due) => due,
            Err(e) => {
                let err = CampaignError::from(e);
                error!("Failed to list due campaigns: {}", err);
                summary.record(None, &err);
                return;
            }
        };

        for campaign in due {
            match self.machine.apply(&campaign, &Transition::Start).await {
                Ok(Some(started)) => {
                    summary.processed += 1;
                    self.dispatcher.launch(started.id);

                    // A run resumed before its first send is started again; its
                    // successor already exists from the first start
                    let first_start = campaign.started_at.is_none();
                    if started.schedule_type == ScheduleType::Recurring && first_start {
                        if let Err(e) = self.schedule_next_run(&started, now).await {
                            warn!(campaign_id = %started.id, "Failed to schedule next run: {}", e);
                            summary.record(Some(started.id), &e);
                        }
                    }
                }
                // Claimed by another poller
                Ok(None) => {}
                Err(e) => self.fail_campaign(&campaign, e, summary).await,
            }
        }
    }

    async fn resume_expired(&self, now: DateTime<Utc>, summary: &mut PollSummary) {
        let expired = match self.store.list_expired_pauses(now, self.batch_limit).await {
            Ok(expired) => expired,
            Err(e) => {
                let err = CampaignError::from(e);
                error!("Failed to list expired pauses: {}", err);
                summary.record(None, &err);
                return;
            }
        };

        let resume = Transition::Resume {
            reason: Some("Pause window elapsed".to_string()),
        };
        for campaign in expired {
            match self.machine.apply(&campaign, &resume).await {
                Ok(Some(resumed)) => {
                    summary.resumed += 1;
                    if resumed.status == CampaignStatus::Processing {
                        self.dispatcher.launch(resumed.id);
                    }
                }
                Ok(None) => {}
                Err(e) => self.fail_campaign(&campaign, e, summary).await,
            }
        }
    }

    async fn reap_stalled(&self, now: DateTime<Utc>, summary: &mut PollSummary) {
        let stale_before = now - self.stalled_after;
        let stalled = match self.store.list_stalled(stale_before, self.batch_limit).await {
            Ok(stalled) => stalled,
            Err(e) => {
                let err = CampaignError::from(e);
                error!("Failed to list stalled campaigns: {}", err);
                summary.record(None, &err);
                return;
            }
        };

        let reclaim = Transition::Reclaim { stale_before };
        for campaign in stalled {
            if self.dispatcher.is_active(campaign.id) {
                continue;
            }
            match self.machine.apply(&campaign, &reclaim).await {
                Ok(Some(reclaimed)) => {
                    warn!(
                        campaign_id = %reclaimed.id,
                        last_progress = %campaign.updated_at,
                        "Reclaimed stalled campaign"
                    );
                    summary.reclaimed += 1;
                    self.dispatcher.launch(reclaimed.id);
                }
                Ok(None) => {}
                Err(e) => self.fail_campaign(&campaign, e, summary).await,
            }
        }
    }

    /// Create the next run of a recurring campaign as a scheduled child.
    /// `None` when that run already exists.
    async fn schedule_next_run(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        let pattern = campaign.recurrence_pattern.as_deref().ok_or_else(|| {
            CampaignError::Validation("Recurring campaign has no recurrence pattern".to_string())
        })?;
        let previous = campaign.scheduled_at.unwrap_or(now);
        let next_at = self.recurrence.next_occurrence(pattern, previous, now)?;

        let recipients: Vec<RecipientAddress> = self
            .store
            .list_recipients(campaign.id)
            .await?
            .iter()
            .filter_map(|r| RecipientAddress::parse(r))
            .collect();

        let Some(scheduled) = self
            .store
            .create_next_run(CreateCampaign::next_run_of(campaign, next_at), &recipients)
            .await?
        else {
            debug!(campaign_id = %campaign.id, next_run = %next_at, "Next recurring run already exists");
            return Ok(None);
        };

        info!(
            campaign_id = %campaign.id,
            next_campaign_id = %scheduled.id,
            next_run = %next_at,
            "Scheduled next recurring run"
        );
        Ok(Some(scheduled))
    }

    /// Record a per-campaign error and mark the campaign failed (best effort)
    async fn fail_campaign(
        &self,
        campaign: &Campaign,
        err: CampaignError,
        summary: &mut PollSummary,
    ) {
        error!(campaign_id = %campaign.id, "Scheduler error: {}", err);
        summary.record(Some(campaign.id), &err);

        let fail = Transition::Fail {
            reason: err.to_string(),
        };
        if let Err(e) = self.machine.apply(campaign, &fail).await {
            warn!(campaign_id = %campaign.id, "Failed to mark campaign failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::recurrence::IntervalRecurrence;
    use crate::campaign::worker::DispatchWorker;
    use crate::testing::{create_campaign, ScriptedGateway};
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use wablast_storage::models::ScheduleAction;
    use wablast_storage::{MemoryCampaignStore, MemoryCreditLedger};

    fn scheduler(store: Arc<MemoryCampaignStore>) -> Scheduler {
        let worker = DispatchWorker::new(
            store.clone(),
            Arc::new(ScriptedGateway::succeeding()),
            Arc::new(MemoryCreditLedger::new()),
        );
        Scheduler::new(store, Arc::new(Dispatcher::new(worker)), Arc::new(IntervalRecurrence))
    }

    async fn scheduled(store: &Arc<MemoryCampaignStore>, schedule_type: ScheduleType, n: usize) -> Campaign {
        let campaign = create_campaign(store.as_ref(), schedule_type, n).await;
        StateMachine::new(store.clone())
            .apply(&campaign, &Transition::Schedule)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_campaign_is_dispatched() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        let campaign = scheduled(&store, ScheduleType::Scheduled, 3).await;

        let summary = scheduler.poll().await;
        assert_eq!(summary.processed, 1);
        assert!(summary.errors.is_empty());

        scheduler.dispatcher().wait_idle().await;
        let done = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(done.status, CampaignStatus::Completed);
        assert_eq!((done.sent_count, done.failed_count), (3, 0));
        assert!(done.started_at.is_some());
    }

    #[tokio::test]
    async fn test_future_campaign_is_not_due() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        let campaign = scheduled(&store, ScheduleType::Scheduled, 1).await;

        let earlier = campaign.scheduled_at.unwrap() - ChronoDuration::minutes(5);
        assert_eq!(scheduler.poll_at(earlier).await, PollSummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_polls_claim_once() {
        let store = Arc::new(MemoryCampaignStore::new());
        let first = scheduler(store.clone());
        let second = scheduler(store.clone());
        let campaign = scheduled(&store, ScheduleType::Scheduled, 2).await;

        let (a, b) = tokio::join!(first.poll(), second.poll());
        assert_eq!(a.processed + b.processed, 1);

        first.dispatcher().wait_idle().await;
        second.dispatcher().wait_idle().await;

        let logs = store.list_logs(campaign.id).await.unwrap();
        let starts = logs.iter().filter(|l| l.action == ScheduleAction::Started).count();
        assert_eq!(starts, 1);
        let done = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!((done.sent_count, done.failed_count), (2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pause_is_resumed() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        let machine = StateMachine::new(store.clone());
        let campaign = scheduled(&store, ScheduleType::Scheduled, 1).await;

        let until = Utc::now() - ChronoDuration::seconds(1);
        machine
            .apply(
                &campaign,
                &Transition::Pause {
                    until: Some(until),
                    reason: None,
                },
            )
            .await
            .unwrap()
            .unwrap();

        let summary = scheduler.poll().await;
        assert_eq!(summary.resumed, 1);

        let resumed = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert!(!resumed.is_paused);
        assert_eq!(resumed.pause_until, None);
        // No sends yet, so it goes back to waiting for its slot.
        assert_eq!(resumed.status, CampaignStatus::Scheduled);

        // A later poll picks it up as due.
        assert_eq!(scheduler.poll().await.processed, 1);
        scheduler.dispatcher().wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_campaign_is_reclaimed() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        let campaign = create_campaign(store.as_ref(), ScheduleType::Immediate, 2).await;
        // Processing with no worker, as after a crash
        StateMachine::new(store.clone())
            .apply(&campaign, &Transition::Schedule)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(scheduler.poll().await.reclaimed, 0);

        let later = Utc::now() + ChronoDuration::minutes(16);
        let summary = scheduler.poll_at(later).await;
        assert_eq!(summary.reclaimed, 1);

        scheduler.dispatcher().wait_idle().await;
        let done = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(done.status, CampaignStatus::Completed);

        let logs = store.list_logs(campaign.id).await.unwrap();
        assert!(logs.iter().any(|l| l.action == ScheduleAction::Reclaimed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_start_schedules_next_run() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        let campaign = scheduled(&store, ScheduleType::Recurring, 2).await;

        let summary = scheduler.poll().await;
        assert_eq!(summary.processed, 1);
        assert!(summary.errors.is_empty());
        scheduler.dispatcher().wait_idle().await;

        let far = campaign.scheduled_at.unwrap() + ChronoDuration::days(1) + ChronoDuration::minutes(1);
        let next = store.list_due(far, 10).await.unwrap();
        assert_eq!(next.len(), 1);
        let child = &next[0];
        assert_eq!(child.parent_campaign_id, Some(campaign.id));
        assert_eq!(child.status, CampaignStatus::Scheduled);
        assert_eq!(child.scheduled_at, Some(campaign.scheduled_at.unwrap() + ChronoDuration::days(1)));
        assert_eq!(
            store.list_recipients(child.id).await.unwrap(),
            store.list_recipients(campaign.id).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_restarted_recurring_run_keeps_single_successor() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        // No workers, so the run stays unsent while it is paused and resumed
        scheduler.dispatcher().shutdown();
        let machine = StateMachine::new(store.clone());
        let campaign = scheduled(&store, ScheduleType::Recurring, 2).await;

        assert_eq!(scheduler.poll().await.processed, 1);

        let running = store.get_campaign(campaign.id).await.unwrap().unwrap();
        let paused = machine
            .apply(&running, &Transition::Pause { until: None, reason: None })
            .await
            .unwrap()
            .unwrap();
        let resumed = machine
            .apply(&paused, &Transition::Resume { reason: None })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resumed.status, CampaignStatus::Scheduled);

        let summary = scheduler.poll().await;
        assert_eq!(summary.processed, 1);
        assert!(summary.errors.is_empty());

        let far = campaign.scheduled_at.unwrap() + ChronoDuration::days(2);
        let successors: Vec<Campaign> = store
            .list_due(far, 10)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.parent_campaign_id == Some(campaign.id))
            .collect();
        assert_eq!(successors.len(), 1);
    }

    #[tokio::test]
    async fn test_next_run_is_idempotent_per_slot() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        let campaign = scheduled(&store, ScheduleType::Recurring, 1).await;
        let now = Utc::now();

        let first = scheduler.schedule_next_run(&campaign, now).await.unwrap();
        assert!(first.is_some());
        assert!(scheduler.schedule_next_run(&campaign, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_error_is_reported() {
        let store = Arc::new(MemoryCampaignStore::new());
        let scheduler = scheduler(store.clone());
        scheduled(&store, ScheduleType::Scheduled, 1).await;
        store.fail_writes(true);

        let summary = scheduler.poll().await;
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].message.contains("Persistence"));
    }
}
