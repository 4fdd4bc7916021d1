// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Minimal operational surface under `/api/v1/`: health, the tracked symbol
// catalog, and ingest counters. Historical queries live in a separate service
// against the storage collaborator, not here.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::{AppState, IngestStatsSnapshot};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    feed_degraded: Option<String>,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let degraded = state.feed_degraded.read().clone();
    let resp = HealthResponse {
        status: if degraded.is_some() { "degraded" } else { "ok" },
        feed_degraded: degraded,
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Tracked symbols
// =============================================================================

#[derive(Serialize)]
struct SymbolsResponse {
    symbols: Vec<String>,
    count: usize,
}

async fn symbols(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = state.config.symbols.clone();
    let count = symbols.len();
    Json(SymbolsResponse { symbols, count })
}

// =============================================================================
// Ingest statistics
// =============================================================================

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    ingest: IngestStatsSnapshot,
    subscribers: usize,
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsResponse {
        ingest: state.stats.snapshot(),
        subscribers: state.hub.subscriber_count(),
    })
}
