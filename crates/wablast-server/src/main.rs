//! WaBlast - Campaign dispatch service entry point

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wablast_api::AppState;
use wablast_common::config::{Config, LoggingConfig};
use wablast_core::{
    CampaignService, DispatchWorker, Dispatcher, HttpGateway, IntervalRecurrence, Scheduler,
};
use wablast_storage::repository::{CampaignStore, CreditLedger};
use wablast_storage::{
    DatabasePool, DbCampaignStore, DbCreditLedger, MemoryCampaignStore, MemoryCreditLedger,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting WaBlast dispatch service...");

    // Initialize storage
    let (store, credits, db_pool) = match config.database.backend.as_str() {
        "postgres" => {
            let db_pool = DatabasePool::new(&config.database).await?;
            info!("Database connection established");

            db_pool.migrate().await?;
            info!("Database migrations completed");

            let store: Arc<dyn CampaignStore> = Arc::new(DbCampaignStore::new(db_pool.clone()));
            let credits: Arc<dyn CreditLedger> = Arc::new(DbCreditLedger::new(db_pool.clone()));
            (store, credits, Some(db_pool))
        }
        "memory" => {
            info!("Using in-memory campaign store");
            let store: Arc<dyn CampaignStore> = Arc::new(MemoryCampaignStore::new());
            let credits: Arc<dyn CreditLedger> = Arc::new(MemoryCreditLedger::new());
            (store, credits, None)
        }
        other => bail!("Unknown database backend: {}", other),
    };

    // Initialize dispatch
    let gateway = Arc::new(HttpGateway::new(&config.gateway)?);
    let shutdown = CancellationToken::new();
    let worker = DispatchWorker::new(store.clone(), gateway, credits)
        .with_gateway_timeout(Duration::from_secs(config.gateway.timeout_secs))
        .with_shutdown(shutdown.clone());
    let dispatcher = Arc::new(Dispatcher::new(worker));
    let recurrence = Arc::new(IntervalRecurrence);

    let scheduler = Arc::new(
        Scheduler::new(store.clone(), dispatcher.clone(), recurrence.clone())
            .with_batch_limit(config.dispatch.batch_limit)
            .with_stalled_after(Duration::from_secs(config.dispatch.stalled_after_secs))
            .with_poll_interval(Duration::from_secs(config.dispatch.poll_interval_secs)),
    );
    let service = Arc::new(
        CampaignService::new(store, dispatcher.clone(), recurrence).with_default_delays(
            config.dispatch.default_min_delay,
            config.dispatch.default_max_delay,
        ),
    );

    // Start scheduler ticker
    let ticker_handle = if config.dispatch.internal_ticker {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        info!(
            "Starting scheduler ticker every {}s",
            config.dispatch.poll_interval_secs
        );
        Some(tokio::spawn(async move {
            scheduler.run(shutdown).await;
        }))
    } else {
        info!("Scheduler ticker disabled, waiting for external poll triggers");
        None
    };

    // Start API server
    let mut state = AppState::new(service, scheduler)
        .with_cors_origins(config.api.cors_origins.clone());
    if let Some(pool) = db_pool {
        state = state.with_db_pool(pool);
    }
    let app = wablast_api::create_router(Arc::new(state));

    let bind = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Starting API server on {}", bind);
    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {}", e);
        }
    });

    info!("WaBlast started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Cleanup
    shutdown.cancel();
    dispatcher.shutdown();
    api_handle.abort();

    if let Some(handle) = ticker_handle {
        let _ = handle.await;
    }
    dispatcher.wait_idle().await;

    info!("WaBlast shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},wablast=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
