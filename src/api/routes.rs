use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{
    api::read::MarketReader,
    error::{IngestError, ReadError},
    ingest::IngestionOrchestrator,
    middleware::request_logging,
    models::{iso_millis, AssetHistory, CoinQuote},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub reader: MarketReader,
    pub orchestrator: Arc<IngestionOrchestrator>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/coins", get(get_current_coins))
        .route("/api/coins/history", post(trigger_ingestion))
        .route("/api/coins/history/:coin_id", get(get_coin_history))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_logging))
                .layer(CorsLayer::permissive()),
        )
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        timestamp: Utc::now(),
    })
}

/// Latest snapshot, coins stamped with the snapshot time
async fn get_current_coins(
    State(state): State<AppState>,
) -> Result<Json<CoinsResponse>, ApiError> {
    let current = state
        .reader
        .get_current()
        .map_err(|e| ApiError::read(e, "Failed to fetch data"))?;

    Ok(Json(CoinsResponse {
        success: true,
        data: current.coins,
        last_updated: current.last_updated,
    }))
}

/// Run one ingestion cycle synchronously
async fn trigger_ingestion(
    State(state): State<AppState>,
) -> Result<Json<IngestResponse>, ApiError> {
    let report = state.orchestrator.run_ingestion_cycle().await?;

    Ok(Json(IngestResponse {
        success: true,
        message: "Snapshot stored successfully",
        coins_processed: report.coins_processed,
    }))
}

async fn get_coin_history(
    State(state): State<AppState>,
    Path(coin_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state
        .reader
        .get_history(&coin_id)
        .map_err(|e| ApiError::read(e, "Failed to fetch coin history"))?;

    Ok(Json(HistoryResponse {
        success: true,
        data: history,
    }))
}

// ===== Request/Response Types =====

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(with = "iso_millis")]
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CoinsResponse {
    success: bool,
    data: Vec<CoinQuote>,
    #[serde(with = "iso_millis")]
    last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    success: bool,
    message: &'static str,
    coins_processed: usize,
}

#[derive(Serialize)]
struct HistoryResponse {
    success: bool,
    data: AssetHistory,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Ingest(IngestError),
    /// Logged in full, reported to the client only as the given message
    Internal {
        source: anyhow::Error,
        message: &'static str,
    },
}

impl ApiError {
    fn read(err: ReadError, message: &'static str) -> Self {
        match err {
            ReadError::NotFound(msg) => ApiError::NotFound(msg),
            ReadError::Storage(e) => ApiError::Internal {
                source: e.into(),
                message,
            },
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Ingest(IngestError::Fetch(e)) => {
                tracing::error!("Ingestion fetch error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to fetch data from CoinGecko API".to_string(),
                )
            }
            ApiError::Ingest(IngestError::Storage(e)) => {
                tracing::error!("Ingestion storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to store snapshot".to_string(),
                )
            }
            ApiError::Internal { source, message } => {
                tracing::error!("Internal error: {:#}", source);
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
