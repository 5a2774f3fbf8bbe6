//! Read side: latest snapshot and per-asset history.

use crate::error::ReadError;
use crate::models::{AssetHistory, CoinQuote};
use crate::storage::{HistoryStore, SnapshotStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Latest snapshot's coins, each stamped with the snapshot's capture time.
#[derive(Debug, Clone)]
pub struct CurrentMarket {
    pub coins: Vec<CoinQuote>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MarketReader {
    snapshots: Arc<dyn SnapshotStore>,
    histories: Arc<dyn HistoryStore>,
}

impl MarketReader {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, histories: Arc<dyn HistoryStore>) -> Self {
        Self {
            snapshots,
            histories,
        }
    }

    pub fn get_current(&self) -> Result<CurrentMarket, ReadError> {
        let snapshot = self
            .snapshots
            .get_latest()?
            .ok_or_else(|| ReadError::NotFound("No snapshot data available".to_string()))?;

        let last_updated = snapshot.timestamp;
        let coins = snapshot
            .coins
            .into_iter()
            .map(|coin| CoinQuote {
                timestamp: last_updated,
                ..coin
            })
            .collect();

        Ok(CurrentMarket {
            coins,
            last_updated,
        })
    }

    pub fn get_history(&self, coin_id: &str) -> Result<AssetHistory, ReadError> {
        self.histories
            .get_history(coin_id)?
            .ok_or_else(|| ReadError::NotFound("Coin history not found".to_string()))
    }
}
