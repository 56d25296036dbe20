//! WaBlast API - REST endpoints for campaign dispatch
//!
//! Tenant-facing campaign operations, the executor callbacks and the
//! scheduler poll trigger.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
