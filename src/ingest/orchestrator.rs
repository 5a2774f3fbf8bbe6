//! Ingestion cycle: fetch -> snapshot -> per-asset history upsert.

use crate::error::IngestError;
use crate::models::{iso_millis, CoinQuote, Snapshot};
use crate::scrapers::MarketDataFetcher;
use crate::storage::{HistoryStore, SnapshotStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Assets fetched per cycle.
pub const DEFAULT_TOP_N: usize = 10;

/// Outcome of one asset's history upsert.
#[derive(Debug, Clone)]
pub struct AssetOutcome {
    pub coin_id: String,
    /// Stored record count after the upsert, when it succeeded.
    pub total_records: Option<usize>,
    pub error: Option<String>,
}

impl AssetOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub snapshot_id: String,
    pub captured_at: DateTime<Utc>,
    /// Number of quotes fetched and written to the snapshot.
    pub coins_processed: usize,
    pub outcomes: Vec<AssetOutcome>,
}

impl IngestionReport {
    pub fn failed(&self) -> impl Iterator<Item = &AssetOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn upserted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }
}

pub struct IngestionOrchestrator {
    fetcher: Arc<dyn MarketDataFetcher>,
    snapshots: Arc<dyn SnapshotStore>,
    histories: Arc<dyn HistoryStore>,
    top_n: usize,
    // At most one cycle in flight, whoever triggers it.
    cycle_lock: Mutex<()>,
}

impl IngestionOrchestrator {
    pub fn new(
        fetcher: Arc<dyn MarketDataFetcher>,
        snapshots: Arc<dyn SnapshotStore>,
        histories: Arc<dyn HistoryStore>,
        top_n: usize,
    ) -> Self {
        Self {
            fetcher,
            snapshots,
            histories,
            top_n,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one full cycle. A fetch failure performs no writes; a failed
    /// snapshot write skips the history step; individual upsert failures
    /// are recorded in the report and do not abort the batch.
    pub async fn run_ingestion_cycle(&self) -> Result<IngestionReport, IngestError> {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();

        info!(top_n = self.top_n, "🔄 Ingestion cycle started");

        let quotes = self.fetcher.fetch_top_assets(self.top_n).await.map_err(|e| {
            error!(error = %e, "Ingestion aborted: no market data available");
            IngestError::Fetch(e)
        })?;

        let snapshot = self.snapshots.create_snapshot(&quotes).map_err(|e| {
            error!(error = %e, "Ingestion aborted: snapshot write failed");
            IngestError::Storage(e)
        })?;

        let outcomes = self.upsert_all(&quotes);
        let report = build_report(snapshot, outcomes);

        info!(
            snapshot_id = %report.snapshot_id,
            captured_at = %iso_millis::format(&report.captured_at),
            coins_processed = report.coins_processed,
            upserted = report.upserted(),
            failed = report.outcomes.len() - report.upserted(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✅ Ingestion cycle completed"
        );

        Ok(report)
    }

    fn upsert_all(&self, quotes: &[CoinQuote]) -> Vec<AssetOutcome> {
        quotes
            .iter()
            .map(|quote| match self.histories.upsert(quote) {
                Ok(history) => AssetOutcome {
                    coin_id: quote.coin_id.clone(),
                    total_records: Some(history.total_records),
                    error: None,
                },
                Err(e) => {
                    warn!(coin_id = %quote.coin_id, error = %e, "History upsert failed; skipping asset");
                    AssetOutcome {
                        coin_id: quote.coin_id.clone(),
                        total_records: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }
}

fn build_report(snapshot: Snapshot, outcomes: Vec<AssetOutcome>) -> IngestionReport {
    IngestionReport {
        snapshot_id: snapshot.snapshot_id,
        captured_at: snapshot.timestamp,
        coins_processed: snapshot.total_coins,
        outcomes,
    }
}
