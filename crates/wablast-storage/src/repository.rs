//! Repository layer for data access

pub mod campaign_items;
pub mod campaigns;
pub mod credits;
pub mod schedule_logs;

pub use campaign_items::CampaignItemRepository;
pub use campaigns::{CampaignStore, DbCampaignStore};
pub use credits::{CreditLedger, DbCreditLedger};
pub use schedule_logs::ScheduleLogRepository;
