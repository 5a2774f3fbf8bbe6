//! CoinGecko market-data integration
//! Mission: pull the top-N assets by market cap and normalize them into quotes

use crate::error::FetchError;
use crate::models::{now_millis, CoinQuote};
use crate::scrapers::rate_limiter::RateLimiter;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "CryptoTracker/1.0";

/// Source of market quotes, ordered by market cap descending.
#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    async fn fetch_top_assets(&self, n: usize) -> Result<Vec<CoinQuote>, FetchError>;
}

/// Raw `/coins/markets` entry. Numeric fields are optional on the wire.
#[derive(Debug, Deserialize)]
struct CoinGeckoMarket {
    id: String,
    name: String,
    symbol: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    price_change_percentage_24h: Option<f64>,
}

pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl CoinGeckoClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    async fn request_markets(&self, n: usize) -> Result<String, FetchError> {
        let url = format!("{}/coins/markets", self.base_url);
        let per_page = n.to_string();

        self.rate_limiter.throttle().await;

        debug!(url = %url, per_page = n, "Requesting market data");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", "usd"),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
                ("sparkline", "false"),
            ])
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }

        response.text().await.map_err(classify)
    }
}

#[async_trait]
impl MarketDataFetcher for CoinGeckoClient {
    async fn fetch_top_assets(&self, n: usize) -> Result<Vec<CoinQuote>, FetchError> {
        let body = match self.request_markets(n).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "CoinGecko fetch failed");
                return Err(e);
            }
        };

        let quotes = parse_markets(&body, n)?;
        info!("Fetched {} quotes from CoinGecko", quotes.len());
        Ok(quotes)
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_decode() {
        FetchError::Malformed(err.to_string())
    } else {
        FetchError::Transport(err)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Normalize a `/coins/markets` payload. Any invalid entry fails the whole
/// batch.
fn parse_markets(body: &str, n: usize) -> Result<Vec<CoinQuote>, FetchError> {
    let markets: Vec<CoinGeckoMarket> = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("unexpected payload shape: {}", e)))?;

    let fetched_at = now_millis();

    let mut quotes = markets
        .into_iter()
        .map(|m| {
            if m.id.trim().is_empty() {
                return Err(FetchError::Malformed("entry with empty id".to_string()));
            }
            let price_usd = non_negative(&m.id, "current_price", m.current_price)?;
            let market_cap = non_negative(&m.id, "market_cap", m.market_cap)?;
            let change_24h = m.price_change_percentage_24h.filter(|c| c.is_finite());

            Ok(CoinQuote {
                coin_id: m.id,
                name: m.name,
                symbol: m.symbol.to_uppercase(),
                price_usd,
                market_cap,
                change_24h,
                timestamp: fetched_at,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    quotes.sort_by(|a, b| b.market_cap.total_cmp(&a.market_cap));
    quotes.truncate(n);
    Ok(quotes)
}

fn non_negative(id: &str, field: &str, value: Option<f64>) -> Result<f64, FetchError> {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Some(v) => Err(FetchError::Malformed(format!("{}: {} = {}", id, field, v))),
        None => Err(FetchError::Malformed(format!("{}: {} missing", id, field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::rate_limiter::test_clock::ManualClock;
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    const MARKETS: &str = r#"[
        {"id":"bitcoin","name":"Bitcoin","symbol":"btc","current_price":65000.5,"market_cap":1280000000000,"price_change_percentage_24h":-1.25,"sparkline_in_7d":null},
        {"id":"ethereum","name":"Ethereum","symbol":"eth","current_price":3100.0,"market_cap":372000000000,"price_change_percentage_24h":null}
    ]"#;

    fn test_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::with_clock(
            Duration::from_millis(5000),
            Arc::new(ManualClock::new()),
        ))
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_markets_normalizes() {
        let quotes = parse_markets(MARKETS, 10).unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].coin_id, "bitcoin");
        assert_eq!(quotes[0].symbol, "BTC");
        assert_eq!(quotes[0].price_usd, 65000.5);
        assert_eq!(quotes[0].change_24h, Some(-1.25));
        assert_eq!(quotes[1].symbol, "ETH");
        assert_eq!(quotes[1].change_24h, None);
        assert_eq!(quotes[0].timestamp, quotes[1].timestamp);
    }

    #[test]
    fn test_parse_markets_orders_by_market_cap() {
        let body = r#"[
            {"id":"small","name":"Small","symbol":"s","current_price":1.0,"market_cap":10.0,"price_change_percentage_24h":0.0},
            {"id":"big","name":"Big","symbol":"b","current_price":1.0,"market_cap":1000.0,"price_change_percentage_24h":0.0}
        ]"#;
        let quotes = parse_markets(body, 1).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].coin_id, "big");
    }

    #[test]
    fn test_parse_markets_rejects_bad_entries() {
        let missing_price = r#"[{"id":"x","name":"X","symbol":"x","current_price":null,"market_cap":1.0}]"#;
        assert!(matches!(parse_markets(missing_price, 10), Err(FetchError::Malformed(_))));

        let negative_cap = r#"[{"id":"x","name":"X","symbol":"x","current_price":1.0,"market_cap":-5.0}]"#;
        assert!(matches!(parse_markets(negative_cap, 10), Err(FetchError::Malformed(_))));

        assert!(matches!(parse_markets(r#"{"error":"nope"}"#, 10), Err(FetchError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_fetch_sends_expected_query() {
        let seen: Arc<parking_lot::Mutex<HashMap<String, String>>> = Arc::default();
        let seen_handler = seen.clone();
        let router = Router::new().route(
            "/coins/markets",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let seen = seen_handler.clone();
                async move {
                    *seen.lock() = params;
                    let body: Value = serde_json::from_str(MARKETS).unwrap();
                    Json(body)
                }
            }),
        );
        let base = serve(router).await;

        let client = CoinGeckoClient::new(&base, DEFAULT_TIMEOUT, test_limiter()).unwrap();
        let quotes = client.fetch_top_assets(10).await.unwrap();
        assert_eq!(quotes.len(), 2);

        let params = seen.lock().clone();
        assert_eq!(params.get("vs_currency").map(String::as_str), Some("usd"));
        assert_eq!(params.get("order").map(String::as_str), Some("market_cap_desc"));
        assert_eq!(params.get("per_page").map(String::as_str), Some("10"));
        assert_eq!(params.get("page").map(String::as_str), Some("1"));
        assert_eq!(params.get("sparkline").map(String::as_str), Some("false"));
    }

    #[tokio::test]
    async fn test_consecutive_fetches_are_spaced() {
        let router = Router::new().route(
            "/coins/markets",
            get(|| async { Json(serde_json::from_str::<Value>(MARKETS).unwrap()) }),
        );
        let base = serve(router).await;

        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::with_clock(
            Duration::from_millis(5000),
            clock.clone(),
        ));
        let client = CoinGeckoClient::new(&base, DEFAULT_TIMEOUT, limiter).unwrap();

        client.fetch_top_assets(10).await.unwrap();
        client.fetch_top_assets(10).await.unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(5000)]);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let router = Router::new().route(
            "/coins/markets",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, Json(json!({"status": "throttled"}))) }),
        );
        let base = serve(router).await;

        let client = CoinGeckoClient::new(&base, DEFAULT_TIMEOUT, test_limiter()).unwrap();
        match client.fetch_top_assets(10).await {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 429),
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let router = Router::new().route(
            "/coins/markets",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "[]"
            }),
        );
        let base = serve(router).await;

        let client =
            CoinGeckoClient::new(&base, Duration::from_millis(100), test_limiter()).unwrap();
        assert!(matches!(
            client.fetch_top_assets(10).await,
            Err(FetchError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = CoinGeckoClient::new(
            &format!("http://{}", addr),
            DEFAULT_TIMEOUT,
            test_limiter(),
        )
        .unwrap();
        assert!(client.fetch_top_assets(10).await.is_err());
    }
}
