//! Link Relay - Main Application Entry Point
//!
//! REST API server that issues API keys to link-saving clients and delivers the links they
//! submit, immediately or in batches.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Open the key store (PostgreSQL with migrations, or in memory)
//! 3. Start the delivery workers
//! 4. Build the HTTP router
//! 5. Serve until ctrl-c, then let the workers drain

use std::sync::Arc;
use std::time::Duration;

use link_relay::{
    config, db,
    db::KeyStore,
    router,
    services::{
        delivery::{ChannelDispatcher, HttpDeliverer, LinkDeliverer, LogDeliverer},
        notifier::LogNotifier,
        registration::TrustPolicy,
    },
    state::AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let store: Arc<dyn KeyStore> = match config.database_url {
        Some(ref database_url) => {
            let pool = db::create_pool(database_url).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            Arc::new(db::PgKeyStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keys are kept in memory");
            Arc::new(db::InMemoryKeyStore::new())
        }
    };

    let deliverer: Arc<dyn LinkDeliverer> = match config.delivery_url {
        Some(ref url) => {
            let secret = config.delivery_secret.clone().unwrap_or_default();
            if secret.is_empty() {
                tracing::warn!("DELIVERY_SECRET not set, delivery signatures use an empty key");
            }
            tracing::info!("Delivering links to {}", url);
            Arc::new(HttpDeliverer::new(url.clone(), secret)?)
        }
        None => {
            tracing::info!("DELIVERY_URL not set, delivered links are only logged");
            Arc::new(LogDeliverer)
        }
    };

    let (dispatcher, workers) = ChannelDispatcher::spawn(
        deliverer,
        store.clone(),
        config.delivery_workers,
        config.delivery_queue_capacity,
    );
    tracing::info!(workers = config.delivery_workers, "Delivery workers started");

    let admin = config.admin_credentials();
    if admin.is_none() {
        tracing::warn!("ADMIN_USER/ADMIN_PASSWORD not set, admin routes are disabled");
    }

    let state = AppState::new(
        store,
        Arc::new(dispatcher),
        Arc::new(LogNotifier),
        TrustPolicy::new(&config.trusted_sources),
        admin,
    );
    let app = router::create_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last dispatcher handle, so the channel is closed now.
    tracing::info!("Waiting for delivery workers to drain");
    if tokio::time::timeout(Duration::from_secs(30), workers.join())
        .await
        .is_err()
    {
        tracing::warn!("Delivery workers did not finish in time");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
