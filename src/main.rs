//! Crypto Tracker - hourly CoinGecko snapshots with rolling per-coin history
//! Serves the latest snapshot and 30-point histories to the dashboard.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crypto_tracker_backend::{
    api::{create_router, AppState, MarketReader},
    config::{load_env, Config},
    ingest::{spawn_ingestion_scheduler, IngestionOrchestrator},
    scrapers::{CoinGeckoClient, RateLimiter},
    storage::{Database, HistoryStore, SnapshotStore, SqliteHistoryStore, SqliteSnapshotStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    let config = Config::parse();

    info!("🚀 Crypto Tracker starting");

    let db_path = config.resolved_db_path();
    let db = Database::open(&db_path)?;
    let snapshots = Arc::new(SqliteSnapshotStore::new(db.clone()));
    let histories = Arc::new(SqliteHistoryStore::new(db));
    info!(
        db_path = %db_path,
        snapshots = snapshots.count()?,
        tracked_assets = histories.count()?,
        "💾 Storage ready"
    );

    let rate_limiter = Arc::new(RateLimiter::new(config.provider_min_interval()));
    let fetcher = Arc::new(
        CoinGeckoClient::new(
            &config.provider_url,
            config.provider_timeout(),
            rate_limiter,
        )
        .context("Failed to build CoinGecko client")?,
    );
    info!(
        provider = %config.provider_url,
        top_n = config.top_n,
        min_interval_ms = config.provider_min_interval_ms,
        "🌐 Market data provider configured"
    );

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        fetcher,
        snapshots.clone(),
        histories.clone(),
        config.top_n,
    ));

    if config.disable_scheduler {
        info!("⏸️  Ingestion scheduler disabled; waiting for POST /api/coins/history");
    } else {
        spawn_ingestion_scheduler(
            orchestrator.clone(),
            config.ingest_interval(),
            config.ingest_on_startup,
        );
    }

    let app = create_router(AppState {
        reader: MarketReader::new(snapshots, histories),
        orchestrator,
    });

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crypto_tracker_backend=debug,crypto_tracker=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
