// =============================================================================
// coinpulse — Main Entry Point
// =============================================================================
//
// One upstream feed, two consumers: every normalized event is fanned out to
// the broadcast hub (live subscribers) and the window aggregator (tumbling
// windows + anomaly detection) through bounded queues. On shutdown the feed
// closes first; the aggregator drains its queue and flushes open windows
// before the process exits.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod anomaly;
mod api;
mod app_state;
mod feed;
mod hub;
mod runtime_config;
mod sentiment;
mod storage;
mod types;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aggregator::WindowAggregator;
use crate::anomaly::AnomalyDetector;
use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;
use crate::storage::LogStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("coinpulse streaming engine starting up");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("COINPULSE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if config.symbols.is_empty() {
        config.symbols = RuntimeConfig::default().symbols;
    }

    info!(
        symbols = ?config.symbols,
        window_secs = config.window_secs,
        late_tolerance_secs = config.late_tolerance_secs,
        "tracked symbols configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 3. Fan-out queues ────────────────────────────────────────────────
    let queue_depth = state.config.queue_depth;
    let (hub_tx, mut hub_rx) = mpsc::channel(queue_depth);
    let (agg_tx, agg_rx) = mpsc::channel(queue_depth);

    // ── 4. Broadcast dispatch task ───────────────────────────────────────
    let hub = state.hub.clone();
    let hub_task = tokio::spawn(async move {
        while let Some(event) = hub_rx.recv().await {
            hub.route(&event);
        }
        info!("broadcast dispatch stopped");
    });

    // ── 5. Window aggregator task ────────────────────────────────────────
    let detector = AnomalyDetector::new(
        state.config.alert_cooldown_secs,
        state.config.rolling_volume_samples,
    );
    let aggregator = WindowAggregator::new(
        state.config.window_ms(),
        state.config.late_tolerance_ms(),
        detector,
        Arc::new(LogStore),
        state.stats.clone(),
    );
    let agg_task = tokio::spawn(aggregator.run(agg_rx));

    // ── 6. Feed client task ──────────────────────────────────────────────
    let feed_state = state.clone();
    let feed_task = tokio::spawn(async move {
        feed::run_feed(feed_state, hub_tx, agg_tx, shutdown_rx).await;
    });

    // ── 7. API server ────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("COINPULSE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    // Feed first: it drops the queue senders, which lets the dispatch and
    // aggregator tasks drain and exit. The aggregator flushes open windows.
    let _ = shutdown_tx.send(true);
    if let Err(e) = feed_task.await {
        error!(error = %e, "feed task join failed");
    }
    if let Err(e) = hub_task.await {
        error!(error = %e, "hub task join failed");
    }
    if let Err(e) = agg_task.await {
        error!(error = %e, "aggregator task join failed");
    }

    info!("coinpulse shut down complete.");
    Ok(())
}
