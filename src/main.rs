mod api;
mod broker;
mod cache;
mod config;
mod engine;
mod error;
mod events;
mod geo;
mod location;
mod models;
mod observability;
mod realtime;
mod state;
mod store;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::models::event::channels;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let state = Arc::new(state::AppState::new(config.clone()));

    // Provision the broker channels up front so consumers can attach
    // before the first publish.
    for channel in [
        channels::RIDER_ASSIGNED,
        channels::RIDER_LOCATION,
        channels::STATUS_CHANGED,
        channels::COMPLETED,
        channels::DEAD_LETTER,
    ] {
        state.broker.provision(channel);
    }

    tokio::spawn(realtime::consumer::run_location_consumer(
        state.broker.clone(),
        state.fanout.clone(),
    ));
    tokio::spawn(engine::retry::run_retry_scheduler(
        state.dispatch.clone(),
        Duration::from_secs(config.retry_interval_secs),
    ));
    tokio::spawn(events::reprocessor::run_reprocessor_loop(
        state.reprocessor.clone(),
        Duration::from_secs(config.dlq_interval_secs),
    ));

    let app = api::rest::router(state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "dispatch service started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
