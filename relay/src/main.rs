mod classify;
mod config;
mod db;
mod encode;
mod errors;
mod memory;
mod metrics;
mod model;
mod queue;
mod relay;
mod rest;
mod store;

use crate::config::{Config, StoreBackend};
use crate::queue::CommandQueues;
use crate::relay::Relay;
use crate::store::{DeviceRegistry, TelemetryStore};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting device command relay");
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Queue capacity: {}, default device id: {}",
        config.queue_capacity, config.default_device_id
    );

    if let Err(e) = metrics::init_metrics() {
        warn!("Failed to register metrics: {}", e);
    }

    let (registry, store): (Arc<dyn DeviceRegistry>, Arc<dyn TelemetryStore>) =
        match config.store_backend {
            StoreBackend::Postgres => {
                info!(
                    "Database: {}",
                    config.database_url.split('@').last().unwrap_or("***")
                );
                let pool = match db::make_pool(&config.database_url, config.db_max_connections).await {
                    Ok(pool) => pool,
                    Err(e) => {
                        error!("Failed to connect to database: {}", e);
                        std::process::exit(1);
                    }
                };
                (
                    Arc::new(db::PgRegistry::new(pool.clone())),
                    Arc::new(db::PgTelemetryStore::new(pool)),
                )
            }
            StoreBackend::Memory => {
                warn!("Using in-memory device registry, records are lost on restart");
                let registry = memory::MemoryRegistry::new();
                for (name, sim_number) in &config.seed_devices {
                    info!("Registering device {} (SIM: {})", name, sim_number);
                    registry
                        .insert(model::DeviceRecord::new(name.as_str(), sim_number.as_str()))
                        .await;
                }
                (
                    Arc::new(registry),
                    Arc::new(memory::MemoryTelemetryStore::new()),
                )
            }
        };

    let relay = Relay::new(
        Arc::new(CommandQueues::new(config.queue_capacity)),
        registry,
        store,
        config.default_device_id.clone(),
    );

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(relay))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    });

    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
