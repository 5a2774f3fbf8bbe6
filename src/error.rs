//! Error taxonomy for ingestion and reads.

use thiserror::Error;

/// Provider call failed; no partial results are ever returned alongside it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("snapshot write failed: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
