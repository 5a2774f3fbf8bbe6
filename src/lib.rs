//! Crypto Tracker Backend Library
//!
//! Ingestion core (rate-limited CoinGecko fetch, snapshot log, rolling
//! per-asset history) plus the HTTP read API built on top of it.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod models;
pub mod scrapers;
pub mod storage;
