//! Runtime configuration from CLI flags and environment.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::DEFAULT_TOP_N;
use crate::scrapers::coingecko::COINGECKO_API_BASE;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "crypto-tracker",
    version,
    about = "Polls CoinGecko for the top coins and serves snapshots and rolling history"
)]
pub struct Config {
    /// Address to bind the HTTP server to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// SQLite file; relative paths are anchored at the crate directory
    #[arg(long, env = "DB_PATH", default_value = "crypto_tracker.db")]
    pub db_path: String,

    #[arg(long, env = "COINGECKO_API_URL", default_value = COINGECKO_API_BASE)]
    pub provider_url: String,

    /// Number of coins fetched per ingestion cycle
    #[arg(long, env = "TOP_N_COINS", default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    /// Minimum spacing between provider calls
    #[arg(long, env = "PROVIDER_MIN_INTERVAL_MS", default_value_t = 5000)]
    pub provider_min_interval_ms: u64,

    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = 15)]
    pub provider_timeout_secs: u64,

    #[arg(long, env = "INGEST_INTERVAL_SECS", default_value_t = 3600)]
    pub ingest_interval_secs: u64,

    /// Do not run the in-process hourly trigger
    #[arg(long, env = "DISABLE_SCHEDULER")]
    pub disable_scheduler: bool,

    /// Run one ingestion cycle right after boot
    #[arg(long, env = "INGEST_ON_STARTUP")]
    pub ingest_on_startup: bool,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn resolved_db_path(&self) -> String {
        resolve_data_path(&self.db_path)
    }

    pub fn provider_min_interval(&self) -> Duration {
        Duration::from_millis(self.provider_min_interval_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_secs.max(1))
    }
}

/// Relative paths are resolved against the crate directory, not the caller's
/// cwd, so running from elsewhere doesn't create a second empty DB.
pub fn resolve_data_path(raw: &str) -> String {
    let raw = raw.trim();
    if raw == ":memory:" {
        return raw.to_string();
    }

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join(p)
        .to_string_lossy()
        .to_string()
}

/// Load `.env` from the cwd chain, then from the crate directory.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let candidate = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
