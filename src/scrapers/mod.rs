pub mod coingecko; // CoinGecko /coins/markets client
pub mod rate_limiter; // Outbound call spacing shared by provider clients

pub use coingecko::{CoinGeckoClient, MarketDataFetcher};
pub use rate_limiter::{Clock, RateLimiter, SystemClock};
