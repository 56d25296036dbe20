//! API request handlers

pub mod campaigns;
pub mod dispatch;
pub mod executor;
pub mod health;

pub use health::*;
