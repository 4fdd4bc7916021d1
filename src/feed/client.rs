// =============================================================================
// Feed Client — upstream combined-stream WebSocket ingestion
// =============================================================================
//
// Maintains one multiplexed connection covering `{symbol}@ticker` and
// `{symbol}@trade` for every tracked symbol. Messages are demultiplexed by
// the stream-name suffix; each parsed event is handed to both fan-out queues
// (broadcast hub and window aggregator) before the next socket read.
//
// Both hand-offs are non-blocking `try_send`s into bounded queues: a full
// queue drops the event in hand for that consumer only (drop-newest) and
// bumps the queue's drop counter, so a slow consumer can never stall the
// socket.
//
// On connection loss the client retries after a constant delay. Gaps during
// an outage are accepted, not backfilled. After enough consecutive failed
// connection attempts the shared degraded-feed flag is raised; it clears on
// the next successful connect. Malformed payloads are dropped per message,
// counted, never fatal.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::types::{MarketEvent, PriceTick, TradeEvent};

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Build the combined-stream URL subscribing every tracked symbol to its
/// ticker and trade streams.
fn build_stream_url(base: &str, symbols: &[String]) -> String {
    let mut streams: Vec<String> = Vec::with_capacity(symbols.len() * 2);
    for sym in symbols {
        let lower = sym.to_lowercase();
        streams.push(format!("{lower}@ticker"));
        streams.push(format!("{lower}@trade"));
    }
    format!("{}/stream?streams={}", base.trim_end_matches('/'), streams.join("/"))
}

/// Run the feed client until shutdown: connect, stream, reconnect forever.
pub async fn run_feed(
    state: Arc<AppState>,
    hub_tx: mpsc::Sender<MarketEvent>,
    agg_tx: mpsc::Sender<MarketEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = build_stream_url(&state.config.upstream_ws_url, &state.config.symbols);
    let reconnect_delay = Duration::from_secs(state.config.reconnect_delay_secs);
    let connect_timeout = Duration::from_secs(state.config.connect_timeout_secs);
    let max_failures = state.config.max_reconnect_failures;

    let mut consecutive_failures: u32 = 0;
    let mut first_attempt = true;

    loop {
        if *shutdown.borrow() {
            break;
        }
        if !first_attempt {
            state.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        first_attempt = false;

        info!(url = %url, "connecting to upstream feed");
        let attempt = tokio::select! {
            res = timeout(connect_timeout, connect_async(&url)) => res,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok(Ok((ws_stream, _response))) => {
                consecutive_failures = 0;
                if state.feed_degraded.write().take().is_some() {
                    info!("upstream feed recovered");
                }
                info!("upstream feed connected");

                match read_loop(ws_stream, &state, &hub_tx, &agg_tx, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Disconnected => {}
                }
            }
            Ok(Err(e)) => {
                consecutive_failures += 1;
                warn!(error = %e, consecutive_failures, "upstream connect failed");
            }
            Err(_) => {
                consecutive_failures += 1;
                warn!(
                    timeout_secs = connect_timeout.as_secs(),
                    consecutive_failures, "upstream connect timed out"
                );
            }
        }

        if consecutive_failures >= max_failures {
            let reason = format!(
                "upstream unavailable after {consecutive_failures} consecutive connection attempts"
            );
            error!(%reason, "feed degraded");
            *state.feed_degraded.write() = Some(reason);
        }

        // Constant reconnect delay, interruptible by shutdown.
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("feed client stopped");
}

/// Read messages until the connection drops or shutdown is signalled.
async fn read_loop(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    state: &Arc<AppState>,
    hub_tx: &mpsc::Sender<MarketEvent>,
    agg_tx: &mpsc::Sender<MarketEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                    match parse_combined_message(&text) {
                        Ok(Some(event)) => dispatch(&event, state, hub_tx, agg_tx),
                        Ok(None) => {
                            // Unrecognized stream suffix; dropped silently.
                        }
                        Err(e) => {
                            state.stats.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "malformed feed message dropped");
                        }
                    }
                }
                Some(Ok(_)) => {
                    // Ping / Pong / Binary / Close frames — tungstenite
                    // answers pings automatically.
                }
                Some(Err(e)) => {
                    error!(error = %e, "upstream read error");
                    return SessionEnd::Disconnected;
                }
                None => {
                    warn!("upstream stream ended");
                    return SessionEnd::Disconnected;
                }
            },
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        }
    }
}

/// Hand one event to both consumers. Never blocks the read path.
fn dispatch(
    event: &MarketEvent,
    state: &Arc<AppState>,
    hub_tx: &mpsc::Sender<MarketEvent>,
    agg_tx: &mpsc::Sender<MarketEvent>,
) {
    match event {
        MarketEvent::Tick(_) => {
            state.stats.ticks_ingested.fetch_add(1, Ordering::Relaxed);
        }
        MarketEvent::Trade(_) => {
            state.stats.trades_ingested.fetch_add(1, Ordering::Relaxed);
        }
    }

    if let Err(e) = hub_tx.try_send(event.clone()) {
        if matches!(e, mpsc::error::TrySendError::Full(_)) {
            state.stats.hub_queue_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("hub queue full, event dropped");
        }
    }
    if let Err(e) = agg_tx.try_send(event.clone()) {
        if matches!(e, mpsc::error::TrySendError::Full(_)) {
            state
                .stats
                .aggregator_queue_dropped
                .fetch_add(1, Ordering::Relaxed);
            debug!("aggregator queue full, event dropped");
        }
    }
}

// =============================================================================
// Message parsing
// =============================================================================

/// Parse one combined-stream envelope into a normalized event.
///
/// Expected shape:
/// ```json
/// { "stream": "btcusdt@ticker", "data": { ... } }
/// ```
///
/// Returns `Ok(None)` for stream names this engine does not consume.
fn parse_combined_message(text: &str) -> Result<Option<MarketEvent>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse feed JSON")?;

    let stream = root["stream"].as_str().context("missing field stream")?;
    let data = &root["data"];

    if stream.ends_with("@ticker") {
        Ok(Some(MarketEvent::Tick(parse_ticker(data)?)))
    } else if stream.ends_with("@trade") {
        Ok(Some(MarketEvent::Trade(parse_trade(data)?)))
    } else {
        Ok(None)
    }
}

/// Parse a 24hr ticker payload.
///
/// Expected shape:
/// ```json
/// { "e": "24hrTicker", "s": "BTCUSDT", "c": "45000.00", "P": "2.50",
///   "q": "1200000000", "h": "46000", "l": "44000", "E": 1700000000000 }
/// ```
fn parse_ticker(data: &serde_json::Value) -> Result<PriceTick> {
    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();

    let price = parse_string_f64(&data["c"], "c")?;
    let volume_24h = parse_string_f64(&data["q"], "q")?;
    let event_time = data["E"].as_i64().context("missing field E")?;

    // The 24h statistics are optional: some venues omit them on thin books.
    let price_change_24h = opt_string_f64(&data["P"]);
    let high_24h = opt_string_f64(&data["h"]);
    let low_24h = opt_string_f64(&data["l"]);

    Ok(PriceTick {
        symbol,
        price,
        volume_24h,
        price_change_24h,
        high_24h,
        low_24h,
        event_time,
    })
}

/// Parse a trade payload.
///
/// Expected shape:
/// ```json
/// { "e": "trade", "s": "BTCUSDT", "p": "45000.00", "q": "0.123",
///   "m": true, "T": 1700000000000 }
/// ```
fn parse_trade(data: &serde_json::Value) -> Result<TradeEvent> {
    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();

    let price = parse_string_f64(&data["p"], "p")?;
    let quantity = parse_string_f64(&data["q"], "q")?;
    let is_buyer_maker = data["m"].as_bool().context("missing field m")?;
    let event_time = data["T"].as_i64().context("missing field T")?;

    Ok(TradeEvent {
        symbol,
        price,
        quantity,
        is_buyer_maker,
        event_time,
    })
}

/// Helper: the venue sends numeric values as JSON strings.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

/// Optional variant of [`parse_string_f64`]: absent or unparseable fields
/// yield `None` instead of an error.
fn opt_string_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_covers_both_streams_per_symbol() {
        let url = build_stream_url(
            "wss://stream.binance.com:9443",
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        );
        assert!(url.starts_with("wss://stream.binance.com:9443/stream?streams="));
        assert!(url.contains("btcusdt@ticker"));
        assert!(url.contains("btcusdt@trade"));
        assert!(url.contains("ethusdt@ticker"));
        assert!(url.contains("ethusdt@trade"));
    }

    #[test]
    fn build_url_tolerates_trailing_slash() {
        let url = build_stream_url("wss://example.com/", &["BTCUSDT".to_string()]);
        assert!(url.starts_with("wss://example.com/stream?streams="));
    }

    #[test]
    fn parse_ticker_message() {
        let json = r#"{
            "stream": "btcusdt@ticker",
            "data": {
                "e": "24hrTicker",
                "E": 1700000000000,
                "s": "BTCUSDT",
                "c": "45000.50",
                "P": "2.51",
                "q": "1200000000.0",
                "h": "46000.00",
                "l": "44000.00"
            }
        }"#;
        let event = parse_combined_message(json).unwrap().unwrap();
        let MarketEvent::Tick(tick) = event else {
            panic!("expected tick");
        };
        assert_eq!(tick.symbol, "BTCUSDT");
        assert!((tick.price - 45000.50).abs() < f64::EPSILON);
        assert_eq!(tick.price_change_24h, Some(2.51));
        assert_eq!(tick.high_24h, Some(46000.0));
        assert_eq!(tick.low_24h, Some(44000.0));
        assert_eq!(tick.event_time, 1_700_000_000_000);
    }

    #[test]
    fn parse_ticker_without_24h_stats() {
        let json = r#"{
            "stream": "btcusdt@ticker",
            "data": {
                "s": "BTCUSDT",
                "c": "45000.50",
                "q": "100.0",
                "E": 1700000000000
            }
        }"#;
        let event = parse_combined_message(json).unwrap().unwrap();
        let MarketEvent::Tick(tick) = event else {
            panic!("expected tick");
        };
        assert_eq!(tick.price_change_24h, None);
        assert_eq!(tick.high_24h, None);
        assert_eq!(tick.low_24h, None);
    }

    #[test]
    fn parse_trade_message() {
        let json = r#"{
            "stream": "ethusdt@trade",
            "data": {
                "e": "trade",
                "s": "ETHUSDT",
                "p": "2500.25",
                "q": "0.5",
                "m": true,
                "T": 1700000000123
            }
        }"#;
        let event = parse_combined_message(json).unwrap().unwrap();
        let MarketEvent::Trade(trade) = event else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol, "ETHUSDT");
        assert!((trade.price - 2500.25).abs() < f64::EPSILON);
        assert!((trade.quantity - 0.5).abs() < f64::EPSILON);
        assert!(trade.is_buyer_maker);
        assert_eq!(trade.event_time, 1_700_000_000_123);
    }

    #[test]
    fn unknown_stream_suffix_dropped_silently() {
        let json = r#"{ "stream": "btcusdt@depth", "data": {} }"#;
        assert!(parse_combined_message(json).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_combined_message("not json").is_err());
        assert!(parse_combined_message(r#"{ "data": {} }"#).is_err());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        // Ticker without a price.
        let json = r#"{
            "stream": "btcusdt@ticker",
            "data": { "s": "BTCUSDT", "q": "100.0", "E": 1700000000000 }
        }"#;
        assert!(parse_combined_message(json).is_err());

        // Trade without the buyer-maker flag.
        let json = r#"{
            "stream": "btcusdt@trade",
            "data": { "s": "BTCUSDT", "p": "1.0", "q": "1.0", "T": 1 }
        }"#;
        assert!(parse_combined_message(json).is_err());
    }
}
