//! Append-only snapshot log

use super::{Database, SnapshotStore};
use crate::error::StoreError;
use crate::models::{iso_millis, now_millis, to_millis, CoinQuote, Snapshot};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::info;

pub struct SqliteSnapshotStore {
    db: Database,
}

impl SqliteSnapshotStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn create_snapshot(&self, quotes: &[CoinQuote]) -> Result<Snapshot, StoreError> {
        let captured_at = now_millis();
        let captured_ms = captured_at.timestamp_millis();
        let coins: Vec<CoinQuote> = quotes
            .iter()
            .map(|q| CoinQuote {
                timestamp: to_millis(q.timestamp),
                ..q.clone()
            })
            .collect();
        let coins_json = serde_json::to_string(&coins)?;
        let base_id = format!("snapshot_{}", captured_ms);

        let conn = self.db.conn().lock();
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO snapshots
                (snapshot_id, captured_at, captured_at_ms, total_coins, coins_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;

        // Same-millisecond snapshots get a numeric suffix.
        let mut snapshot_id = base_id.clone();
        let mut attempt = 1u32;
        loop {
            let inserted = stmt.execute(params![
                snapshot_id,
                iso_millis::format(&captured_at),
                captured_ms,
                quotes.len() as i64,
                coins_json,
            ])?;
            if inserted > 0 {
                break;
            }
            snapshot_id = format!("{}-{}", base_id, attempt);
            attempt += 1;
        }

        info!(
            snapshot_id = %snapshot_id,
            total_coins = quotes.len(),
            "📸 Snapshot stored"
        );

        Ok(Snapshot {
            snapshot_id,
            timestamp: captured_at,
            total_coins: quotes.len(),
            coins,
        })
    }

    fn get_latest(&self) -> Result<Option<Snapshot>, StoreError> {
        let conn = self.db.conn().lock();
        let row = conn
            .prepare_cached(
                "SELECT snapshot_id, captured_at, total_coins, coins_json
                 FROM snapshots
                 ORDER BY captured_at_ms DESC, seq DESC
                 LIMIT 1",
            )?
            .query_row([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;

        let Some((snapshot_id, captured_at, total_coins, coins_json)) = row else {
            return Ok(None);
        };

        let timestamp = DateTime::parse_from_rfc3339(&captured_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", snapshot_id, e)))?;
        let coins: Vec<CoinQuote> = serde_json::from_str(&coins_json)?;

        Ok(Some(Snapshot {
            snapshot_id,
            timestamp,
            total_coins: total_coins as usize,
            coins,
        }))
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.db.conn().lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;

    fn create_test_store() -> SqliteSnapshotStore {
        SqliteSnapshotStore::new(Database::open(":memory:").expect("Failed to create database"))
    }

    fn quotes(prefix: &str, n: usize) -> Vec<CoinQuote> {
        let now = Utc::now();
        (0..n)
            .map(|i| CoinQuote {
                coin_id: format!("{}-{}", prefix, i),
                name: format!("Coin {}", i),
                symbol: format!("C{}", i),
                price_usd: 10.0 * (n - i) as f64,
                market_cap: 1_000.0 * (n - i) as f64,
                change_24h: if i % 2 == 0 { Some(1.0) } else { None },
                timestamp: now,
            })
            .collect()
    }

    #[test]
    fn test_empty_store_has_no_latest() {
        let store = create_test_store();
        assert!(store.get_latest().unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_create_snapshot_copies_input() {
        let store = create_test_store();
        let input = quotes("a", 10);

        let snapshot = store.create_snapshot(&input).unwrap();
        assert_eq!(snapshot.total_coins, 10);
        assert!(snapshot.snapshot_id.starts_with("snapshot_"));

        let latest = store.get_latest().unwrap().unwrap();
        assert_eq!(latest.snapshot_id, snapshot.snapshot_id);
        assert_eq!(latest.coins.len(), 10);
        assert_eq!(latest.coins[3].coin_id, "a-3");
        assert_eq!(latest.coins[3].change_24h, None);
    }

    #[test]
    fn test_created_snapshot_matches_stored() {
        let store = create_test_store();
        let mut input = quotes("p", 3);
        let precise = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + Duration::nanoseconds(123_456_789);
        for q in &mut input {
            q.timestamp = precise;
        }

        let created = store.create_snapshot(&input).unwrap();
        let latest = store.get_latest().unwrap().unwrap();

        assert_eq!(created, latest);
        assert_eq!(created.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(latest.coins[0].timestamp.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_latest_is_last_created() {
        let store = create_test_store();

        let mut last_id = String::new();
        for i in 0..25 {
            let snapshot = store.create_snapshot(&quotes(&format!("s{}", i), 2)).unwrap();
            last_id = snapshot.snapshot_id;
            // Interleaved reads never disturb ordering
            assert_eq!(store.get_latest().unwrap().unwrap().snapshot_id, last_id);
        }

        let latest = store.get_latest().unwrap().unwrap();
        assert_eq!(latest.snapshot_id, last_id);
        assert_eq!(latest.coins[0].coin_id, "s24-0");
        assert_eq!(store.count().unwrap(), 25);
    }

    #[test]
    fn test_snapshot_ids_are_unique() {
        let store = create_test_store();
        let ids: HashSet<String> = (0..50)
            .map(|_| store.create_snapshot(&[]).unwrap().snapshot_id)
            .collect();
        assert_eq!(ids.len(), 50);
    }
}
