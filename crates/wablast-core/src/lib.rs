//! WaBlast Core - Campaign dispatch and scheduling engine
//!
//! This crate provides the campaign state machine, the scheduler loop,
//! the throttled dispatch workers and the message gateway client.

pub mod campaign;
pub mod error;
pub mod gateway;

#[cfg(test)]
pub(crate) mod testing;

pub use campaign::{
    CampaignService, DispatchWorker, Dispatcher, IntervalRecurrence, PollSummary, Scheduler,
    StateMachine,
};
pub use error::{CampaignError, Result};
pub use gateway::{GatewayError, GatewayReceipt, HttpGateway, MessageGateway};
