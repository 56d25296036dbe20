//! API routes

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{campaigns, dispatch, executor, health};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness));

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/", post(campaigns::create_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/logs", get(campaigns::list_campaign_logs))
        .route("/:campaign_id/schedule", post(campaigns::schedule_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/resume", post(campaigns::resume_campaign))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign));

    // Executor callbacks
    let executor_routes = Router::new()
        .route("/items/:item_id/status", patch(executor::update_item_status))
        .route(
            "/campaigns/:campaign_id/counters",
            post(executor::increment_counters),
        );

    let api_v1 = Router::new()
        .route("/dispatch/poll", post(dispatch::poll))
        .nest("/tenants/:tenant_id/campaigns", campaign_routes)
        .nest("/executor", executor_routes);

    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(allowed)
    }
}
