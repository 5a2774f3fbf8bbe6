use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of records kept per asset.
pub const HISTORY_CAPACITY: usize = 30;

/// A single asset quote as normalized from the market-data provider.
///
/// All quotes returned by one fetch share the same `timestamp` (the instant
/// the fetch completed locally).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinQuote {
    pub coin_id: String,
    pub name: String,
    /// Ticker, always uppercase
    pub symbol: String,
    #[serde(rename = "priceUSD")]
    pub price_usd: f64,
    pub market_cap: f64,
    /// Provider may omit this; kept as `None` rather than coerced.
    #[serde(rename = "change24h")]
    pub change_24h: Option<f64>,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl CoinQuote {
    /// The per-record slice of this quote stored in an asset's history.
    pub fn to_record(&self) -> HistoryRecord {
        HistoryRecord {
            price_usd: self.price_usd,
            market_cap: self.market_cap,
            change_24h: self.change_24h,
            timestamp: to_millis(self.timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(rename = "priceUSD")]
    pub price_usd: f64,
    pub market_cap: f64,
    #[serde(rename = "change24h")]
    pub change_24h: Option<f64>,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// Rolling per-asset history, oldest record first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHistory {
    pub coin_id: String,
    pub name: String,
    pub symbol: String,
    pub records: VecDeque<HistoryRecord>,
    pub total_records: usize,
    #[serde(with = "iso_millis")]
    pub last_updated: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

impl AssetHistory {
    /// First observation of an asset.
    pub fn first_observation(quote: &CoinQuote, now: DateTime<Utc>) -> Self {
        let mut records = VecDeque::with_capacity(HISTORY_CAPACITY);
        records.push_back(quote.to_record());
        Self {
            coin_id: quote.coin_id.clone(),
            name: quote.name.clone(),
            symbol: quote.symbol.clone(),
            records,
            total_records: 1,
            last_updated: now,
            created_at: now,
        }
    }

    /// Append a record for `quote`, evicting the oldest ones beyond
    /// [`HISTORY_CAPACITY`].
    pub fn append(&mut self, quote: &CoinQuote, now: DateTime<Utc>) {
        push_bounded(&mut self.records, quote.to_record(), HISTORY_CAPACITY);
        self.total_records = self.records.len();
        self.last_updated = now;
    }

    pub fn latest(&self) -> Option<&HistoryRecord> {
        self.records.back()
    }
}

/// Current instant at the precision timestamps are persisted with.
pub fn now_millis() -> DateTime<Utc> {
    to_millis(Utc::now())
}

/// Drop sub-millisecond precision so a value survives a storage round trip.
pub fn to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// FIFO push that never lets `buf` grow past `capacity`.
pub fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while buf.len() >= capacity {
        buf.pop_front();
    }
    buf.push_back(item);
}

/// Immutable capture of every tracked quote from one ingestion cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_id: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub total_coins: usize,
    pub coins: Vec<CoinQuote>,
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}
