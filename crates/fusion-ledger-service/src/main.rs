//! Fusion ledger service - HTTP API for fusion credits.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fusion_ledger_service::{
    create_router, spawn_reconciliation, AppState, ServiceConfig, StorageBackend,
};
use fusion_ledger_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fusion_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fusion ledger service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        storage_backend = ?config.storage_backend,
        jwt_mode = if config.auth_jwt_secret.is_some() { "hs256" } else { "jwks" },
        stripe_configured = %config.stripe_webhook_secret.is_some(),
        reconcile_interval_seconds = config.reconcile_interval_seconds,
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    if config.reconcile_interval_seconds > 0 {
        spawn_reconciliation(
            Arc::clone(&store),
            Duration::from_secs(config.reconcile_interval_seconds),
        );
    }

    let state = AppState::new(store, config.clone());
    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres backend")?;
            tracing::info!(max_connections = config.database_max_connections, "Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        StorageBackend::RocksDb => open_rocks(&config.data_dir),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store - balances will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_rocks(data_dir: &str) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    Ok(Arc::new(fusion_ledger_store::RocksStore::open(data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_rocks(_data_dir: &str) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    Err("this build has no RocksDB support; rebuild with --features rocksdb-backend".into())
}
