//! Dispatcher - one worker task per processing campaign

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use wablast_common::types::CampaignId;

use super::worker::{DispatchWorker, WorkerExit};

/// Campaigns with a running task, each with a pending-rerun flag
struct ActiveSet {
    campaigns: Mutex<HashMap<CampaignId, bool>>,
    count: watch::Sender<usize>,
}

impl ActiveSet {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            campaigns: Mutex::new(HashMap::new()),
            count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CampaignId, bool>> {
        // The set stays consistent even if a holder panicked
        self.campaigns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `campaign_id` active. When a task already holds it, ask that task
    /// to run the worker once more and return false.
    fn claim(&self, campaign_id: CampaignId) -> bool {
        let mut set = self.lock();
        if let Some(rerun) = set.get_mut(&campaign_id) {
            *rerun = true;
            return false;
        }
        set.insert(campaign_id, false);
        self.count.send_replace(set.len());
        true
    }

    /// Called when a run ends: consume a pending rerun, or release the
    /// campaign. Both happen under one lock so no request is lost.
    fn rerun_or_release(&self, campaign_id: CampaignId) -> bool {
        let mut set = self.lock();
        if let Some(rerun) = set.get_mut(&campaign_id) {
            if *rerun {
                *rerun = false;
                return true;
            }
        }
        self.remove_locked(&mut set, campaign_id);
        false
    }

    fn remove_locked(&self, set: &mut HashMap<CampaignId, bool>, campaign_id: CampaignId) {
        set.remove(&campaign_id);
        self.count.send_replace(set.len());
    }
}

/// Releases a campaign when its task ends without doing so itself
struct ActiveGuard {
    campaign_id: CampaignId,
    active: Arc<ActiveSet>,
    released: bool,
}

impl ActiveGuard {
    fn rerun_or_release(&mut self) -> bool {
        let rerun = self.active.rerun_or_release(self.campaign_id);
        self.released = !rerun;
        rerun
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if !self.released {
            let mut set = self.active.lock();
            self.active.remove_locked(&mut set, self.campaign_id);
        }
    }
}

/// Spawns and tracks dispatch workers
pub struct Dispatcher {
    worker: DispatchWorker,
    active: Arc<ActiveSet>,
}

impl Dispatcher {
    /// Create a dispatcher launching clones of `worker`
    pub fn new(worker: DispatchWorker) -> Self {
        Self {
            worker,
            active: Arc::new(ActiveSet::new()),
        }
    }

    /// Launch a worker for `campaign_id` unless one is already running in
    /// this process. Returns whether a task was started; otherwise the
    /// running task reruns the worker once its current run ends.
    pub fn launch(&self, campaign_id: CampaignId) -> bool {
        if self.worker.shutdown_token().is_cancelled() {
            return false;
        }
        if !self.active.claim(campaign_id) {
            return false;
        }

        let mut guard = ActiveGuard {
            campaign_id,
            active: self.active.clone(),
            released: false,
        };
        let worker = self.worker.clone();

        tokio::spawn(async move {
            loop {
                match worker.run(campaign_id).await {
                    Ok(WorkerExit::Shutdown) => {
                        info!(campaign_id = %campaign_id, "Dispatch worker interrupted by shutdown");
                    }
                    Ok(exit) => {
                        info!(campaign_id = %campaign_id, exit = ?exit, "Dispatch worker finished");
                    }
                    Err(e) => {
                        error!(campaign_id = %campaign_id, "Dispatch worker failed: {}", e);
                    }
                }
                if worker.shutdown_token().is_cancelled() || !guard.rerun_or_release() {
                    break;
                }
                debug!(campaign_id = %campaign_id, "Launch requested during run, running worker again");
            }
        });

        true
    }

    /// Whether a worker for `campaign_id` is running in this process
    pub fn is_active(&self, campaign_id: CampaignId) -> bool {
        self.active.lock().contains_key(&campaign_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Wait until no worker is running
    pub async fn wait_idle(&self) {
        let mut rx = self.active.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Interrupt every running worker and refuse new launches
    pub fn shutdown(&self) {
        self.worker.shutdown_token().cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.worker.shutdown_token()
    }
}
