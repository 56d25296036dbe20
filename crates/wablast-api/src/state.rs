//! Shared handler state

use std::sync::Arc;

use wablast_core::{CampaignService, Scheduler};
use wablast_storage::DatabasePool;

/// State shared by every handler
pub struct AppState {
    pub service: Arc<CampaignService>,
    pub scheduler: Arc<Scheduler>,
    /// Absent when running on the in-memory store
    pub db_pool: Option<DatabasePool>,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(service: Arc<CampaignService>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            service,
            scheduler,
            db_pool: None,
            cors_origins: Vec::new(),
        }
    }

    pub fn with_db_pool(mut self, pool: DatabasePool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
