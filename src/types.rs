// =============================================================================
// Shared types used across the coinpulse streaming engine
// =============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Normalized feed events
// =============================================================================

/// A normalized 24h ticker update for a single symbol, produced by the feed
/// client from `@ticker` messages. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    /// Last traded price.
    pub price: f64,
    /// Rolling 24h quote volume reported by the venue.
    pub volume_24h: f64,
    /// 24h price change in percent; absent on some venues / degraded feeds.
    pub price_change_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    /// Venue event time, epoch milliseconds.
    pub event_time: i64,
}

/// A single executed trade, produced by the feed client from `@trade`
/// messages. Broadcast to subscribers but never windowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    /// Venue trade time, epoch milliseconds.
    pub event_time: i64,
}

/// Normalized event envelope handed to both the broadcast hub and the window
/// aggregator. The serde tag matches the wire shape subscribers receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarketEvent {
    #[serde(rename = "price_update")]
    Tick(PriceTick),
    #[serde(rename = "trade")]
    Trade(TradeEvent),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Tick(t) => &t.symbol,
            Self::Trade(t) => &t.symbol,
        }
    }

    pub fn event_time(&self) -> i64 {
        match self {
            Self::Tick(t) => t.event_time,
            Self::Trade(t) => t.event_time,
        }
    }
}

// =============================================================================
// Aggregated window metrics
// =============================================================================

/// One closed tumbling window for one symbol. Emitted exactly once to the
/// storage collaborator, then discarded from memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub symbol: String,
    /// Window start, epoch milliseconds (aligned to the window length).
    pub window_start: i64,
    /// Window end, epoch milliseconds (exclusive).
    pub window_end: i64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    /// Volume-weighted average price; equals `avg_price` when the window's
    /// total volume is zero.
    pub vwap: f64,
    pub total_volume: f64,
    pub trade_count: u64,
    /// Sample standard deviation of folded prices; `None` with fewer than
    /// two samples.
    pub price_volatility: Option<f64>,
    pub price_range: f64,
    pub avg_sentiment: Option<f64>,
    pub sentiment_count: u64,
}

// =============================================================================
// Alerts
// =============================================================================

/// Which anomaly rule produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PriceSpike,
    VolumeSurge,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceSpike => write!(f, "price_spike"),
            Self::VolumeSurge => write!(f, "volume_surge"),
        }
    }
}

/// Alert severity. `Low` never produces an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// An anomaly alert. Lifecycle is append-only here; resolution and expiry
/// belong to the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub symbol: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    /// The metric value that crossed its threshold.
    pub trigger_value: f64,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    pub is_active: bool,
}
