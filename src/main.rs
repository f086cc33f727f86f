//! Dataset Service
//!
//! REST API over vehicle telematics violation records ("datasets").
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DATASET SERVICE                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐ │
//! │  │  Routes   │─▶│  Auth     │─▶│  Handlers               │ │
//! │  │  (Axum)   │  │  (JWT)    │  │  + serializers          │ │
//! │  └───────────┘  └───────────┘  └────────────┬────────────┘ │
//! │                                             ▼              │
//! │                              ┌──────────────────────────┐  │
//! │                              │ Store: PostgreSQL/memory │  │
//! │                              └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod error;
mod extract;
mod handlers;
mod middleware;
mod models;
mod routes;
mod serializers;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

use store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dataset_service=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    config.validate()?;

    tracing::info!("Dataset Service starting ({})", config.environment);

    let store: Arc<dyn Store> = if config.uses_memory_store() {
        tracing::warn!("Using in-memory store; records are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Database: {}", config.redacted_database_url());

        let pool = db::create_pool(&config.database_url, config.db_max_connections)
            .await
            .context("Failed to create database pool")?;

        tracing::info!("Running database migrations...");
        db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Arc::new(PgStore::new(pool))
    };

    // Build application state
    let state = AppState {
        store,
        config: config.clone(),
    };

    let app = routes::create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: config::Config,
}
