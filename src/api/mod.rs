pub mod read;
pub mod routes;

pub use read::{CurrentMarket, MarketReader};
pub use routes::{create_router, ApiError, AppState};
