//! Campaign dispatch - lifecycle, scheduling and per-recipient sending

pub mod dispatcher;
pub mod lifecycle;
pub mod rate_controller;
pub mod reconcile;
pub mod recurrence;
pub mod scheduler;
pub mod service;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use lifecycle::{StateMachine, Transition};
pub use rate_controller::{next_delay, next_delay_with};
pub use reconcile::{CounterUpdate, ItemStatusReport, Reconciler};
pub use recurrence::{IntervalRecurrence, RecurrenceEvaluator, RecurrencePattern};
pub use scheduler::{PollError, PollSummary, Scheduler};
pub use service::{CampaignCreated, CampaignService, CreateCampaignRequest};
pub use worker::{DispatchWorker, WorkerExit};
