// =============================================================================
// Runtime Configuration — Engine settings loaded at startup
// =============================================================================
//
// Central configuration for the coinpulse engine. All fields carry
// `#[serde(default)]` so that loading an older config file never breaks when
// new fields are added. Nothing mutates the config after startup; it is read
// through `AppState`.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "ADAUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_upstream_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_window_secs() -> u64 {
    300
}

fn default_late_tolerance_secs() -> u64 {
    600
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_reconnect_failures() -> u32 {
    10
}

fn default_queue_depth() -> usize {
    1024
}

fn default_subscriber_queue_depth() -> usize {
    256
}

fn default_rolling_volume_samples() -> usize {
    20
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the coinpulse engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Feed ----------------------------------------------------------------

    /// Symbols the engine tracks. Subscriptions outside this set are rejected.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Base URL of the upstream combined-stream WebSocket endpoint.
    #[serde(default = "default_upstream_ws_url")]
    pub upstream_ws_url: String,

    /// Delay between reconnect attempts after the upstream connection drops.
    /// Constant, not exponential.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Bound on a single upstream connection attempt, separate from the
    /// reconnect delay.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Consecutive failed connection attempts before the feed is reported as
    /// degraded. Reconnects continue regardless.
    #[serde(default = "default_max_reconnect_failures")]
    pub max_reconnect_failures: u32,

    // --- Fan-out -------------------------------------------------------------

    /// Depth of the bounded feed -> hub and feed -> aggregator queues.
    /// When a queue is full the newest event is dropped for that consumer.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Depth of each subscriber's outbound queue.
    #[serde(default = "default_subscriber_queue_depth")]
    pub subscriber_queue_depth: usize,

    // --- Windowing -----------------------------------------------------------

    /// Tumbling window length. Windows are aligned to epoch boundaries.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Late tolerance subtracted from the max observed event time to form the
    /// watermark. Events behind a closed window are dropped.
    #[serde(default = "default_late_tolerance_secs")]
    pub late_tolerance_secs: u64,

    // --- Alerting ------------------------------------------------------------

    /// Minimum event-time seconds between alerts for the same
    /// (symbol, alert type) pair. Zero disables the cooldown, in which case
    /// every qualifying tick re-alerts.
    #[serde(default)]
    pub alert_cooldown_secs: u64,

    /// Number of volume samples retained per symbol for the rolling average
    /// used in volume-ratio context.
    #[serde(default = "default_rolling_volume_samples")]
    pub rolling_volume_samples: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            upstream_ws_url: default_upstream_ws_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_reconnect_failures: default_max_reconnect_failures(),
            queue_depth: default_queue_depth(),
            subscriber_queue_depth: default_subscriber_queue_depth(),
            window_secs: default_window_secs(),
            late_tolerance_secs: default_late_tolerance_secs(),
            alert_cooldown_secs: 0,
            rolling_volume_samples: default_rolling_volume_samples(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            window_secs = config.window_secs,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Window length in epoch milliseconds.
    pub fn window_ms(&self) -> i64 {
        self.window_secs as i64 * 1000
    }

    /// Late tolerance in epoch milliseconds.
    pub fn late_tolerance_ms(&self) -> i64 {
        self.late_tolerance_secs as i64 * 1000
    }
}
