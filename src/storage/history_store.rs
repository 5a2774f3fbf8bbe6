//! Per-asset rolling history
//! Mission: one row per coin, newest 30 quotes, oldest evicted first

use super::{Database, HistoryStore};
use crate::error::StoreError;
use crate::models::{iso_millis, now_millis, AssetHistory, CoinQuote, HistoryRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::VecDeque;
use tracing::debug;

pub struct SqliteHistoryStore {
    db: Database,
}

impl SqliteHistoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn load(conn: &Connection, coin_id: &str) -> Result<Option<AssetHistory>, StoreError> {
        let row = conn
            .prepare_cached(
                "SELECT coin_id, name, symbol, records_json, total_records, last_updated, created_at
                 FROM asset_history WHERE coin_id = ?1",
            )?
            .query_row(params![coin_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .optional()?;

        let Some((coin_id, name, symbol, records_json, total_records, last_updated, created_at)) =
            row
        else {
            return Ok(None);
        };

        let records: VecDeque<HistoryRecord> = serde_json::from_str(&records_json)?;
        let total_records = usize::try_from(total_records)
            .map_err(|_| StoreError::Corrupt(format!("{}: negative total_records", coin_id)))?;

        Ok(Some(AssetHistory {
            name,
            symbol,
            records,
            total_records,
            last_updated: parse_ts(&coin_id, &last_updated)?,
            created_at: parse_ts(&coin_id, &created_at)?,
            coin_id,
        }))
    }

    fn save(conn: &Connection, history: &AssetHistory) -> Result<(), StoreError> {
        let records_json = serde_json::to_string(&history.records)?;
        conn.prepare_cached(
            "INSERT INTO asset_history
                (coin_id, name, symbol, records_json, total_records, last_updated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(coin_id) DO UPDATE SET
                records_json = excluded.records_json,
                total_records = excluded.total_records,
                last_updated = excluded.last_updated",
        )?
        .execute(params![
            history.coin_id,
            history.name,
            history.symbol,
            records_json,
            history.total_records as i64,
            iso_millis::format(&history.last_updated),
            iso_millis::format(&history.created_at),
        ])?;
        Ok(())
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn upsert(&self, quote: &CoinQuote) -> Result<AssetHistory, StoreError> {
        let now = now_millis();
        let conn = self.db.conn().lock();

        let history = match Self::load(&conn, &quote.coin_id)? {
            Some(mut existing) => {
                existing.append(quote, now);
                existing
            }
            None => AssetHistory::first_observation(quote, now),
        };

        Self::save(&conn, &history)?;
        debug!(
            coin_id = %history.coin_id,
            total_records = history.total_records,
            "History upserted"
        );
        Ok(history)
    }

    fn get_history(&self, coin_id: &str) -> Result<Option<AssetHistory>, StoreError> {
        let conn = self.db.conn().lock();
        Self::load(&conn, coin_id)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.db.conn().lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM asset_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_ts(coin_id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{}: bad timestamp {:?}: {}", coin_id, raw, e)))
}
