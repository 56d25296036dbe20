//! WaBlast Storage - Campaign persistence
//!
//! This crate provides the campaign store used by the dispatch engine,
//! backed by PostgreSQL or held in memory.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::{MemoryCampaignStore, MemoryCreditLedger};
pub use models::*;
pub use repository::*;
