//! SQLite persistence for snapshots and per-asset history.
//!
//! Both stores share one connection; every write is a single statement so
//! readers never observe a half-written snapshot or asset.

pub mod history_store;
pub mod snapshot_store;

pub use history_store::SqliteHistoryStore;
pub use snapshot_store::SqliteSnapshotStore;

use crate::error::StoreError;
use crate::models::{AssetHistory, CoinQuote, Snapshot};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS asset_history (
    coin_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    symbol TEXT NOT NULL,
    records_json TEXT NOT NULL,
    total_records INTEGER NOT NULL,
    last_updated TEXT NOT NULL,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS snapshots (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id TEXT NOT NULL UNIQUE,
    captured_at TEXT NOT NULL,
    captured_at_ms INTEGER NOT NULL,
    total_coins INTEGER NOT NULL,
    coins_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_latest
    ON snapshots(captured_at_ms DESC, seq DESC);
"#;

/// Owns asset histories. Upserts are independent per asset.
pub trait HistoryStore: Send + Sync {
    /// Create or extend the history for `quote.coin_id`, returning the
    /// stored document.
    fn upsert(&self, quote: &CoinQuote) -> Result<AssetHistory, StoreError>;
    fn get_history(&self, coin_id: &str) -> Result<Option<AssetHistory>, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
}

/// Append-only snapshot log.
pub trait SnapshotStore: Send + Sync {
    fn create_snapshot(&self, quotes: &[CoinQuote]) -> Result<Snapshot, StoreError>;
    /// Snapshot with the greatest capture instant (latest write on ties).
    fn get_latest(&self) -> Result<Option<Snapshot>, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
}

/// Shared SQLite handle.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `db_path`; `":memory:"` is allowed.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Database initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> &Mutex<Connection> {
        &self.conn
    }
}
