// =============================================================================
// Window Accumulator — running aggregates for one open tumbling window
// =============================================================================
//
// Keeps running sum / count / extrema / sum-of-squares instead of raw
// samples, so memory per open window is constant regardless of tick rate.
// Finalization derives every metric the window emits:
//
//   avg_price        mean of folded prices
//   vwap             sum(price * volume) / sum(volume), avg_price when
//                    total volume is zero
//   price_volatility sample standard deviation, None under 2 folds
//   price_range      max - min
//   avg_sentiment    running mean of sentiment scores for ticks that carried
//                    a 24h price change
// =============================================================================

use crate::sentiment;
use crate::types::{AggregatedMetrics, PriceTick};

/// Running accumulator for a single `(symbol, window_start)` window.
#[derive(Debug, Clone)]
pub struct WindowAccumulator {
    symbol: String,
    window_start: i64,
    window_end: i64,

    count: u64,
    sum_price: f64,
    sum_price_sq: f64,
    min_price: f64,
    max_price: f64,
    sum_price_volume: f64,
    sum_volume: f64,
    sentiment_sum: f64,
    sentiment_count: u64,
}

impl WindowAccumulator {
    pub fn new(symbol: String, window_start: i64, window_end: i64) -> Self {
        Self {
            symbol,
            window_start,
            window_end,
            count: 0,
            sum_price: 0.0,
            sum_price_sq: 0.0,
            min_price: f64::INFINITY,
            max_price: f64::NEG_INFINITY,
            sum_price_volume: 0.0,
            sum_volume: 0.0,
            sentiment_sum: 0.0,
            sentiment_count: 0,
        }
    }

    pub fn window_end(&self) -> i64 {
        self.window_end
    }

    /// Fold one tick into the window. The sentiment policy is invoked only
    /// when the tick carries a 24h price change.
    pub fn fold(&mut self, tick: &PriceTick) {
        self.count += 1;
        self.sum_price += tick.price;
        self.sum_price_sq += tick.price * tick.price;
        self.min_price = self.min_price.min(tick.price);
        self.max_price = self.max_price.max(tick.price);
        self.sum_price_volume += tick.price * tick.volume_24h;
        self.sum_volume += tick.volume_24h;

        if let Some(change) = tick.price_change_24h {
            self.sentiment_sum += sentiment::score(change).sentiment;
            self.sentiment_count += 1;
        }
    }

    /// Finalize the window into an immutable metrics record. Returns `None`
    /// for a window that never received a fold — empty windows are not
    /// emitted.
    pub fn finalize(self) -> Option<AggregatedMetrics> {
        if self.count == 0 {
            return None;
        }

        let n = self.count as f64;
        let avg_price = self.sum_price / n;

        let vwap = if self.sum_volume > 0.0 {
            self.sum_price_volume / self.sum_volume
        } else {
            avg_price
        };

        let price_volatility = if self.count >= 2 {
            // Sample variance from the sum of squares.
            let variance = (self.sum_price_sq - n * avg_price * avg_price) / (n - 1.0);
            Some(variance.max(0.0).sqrt())
        } else {
            None
        };

        let avg_sentiment = if self.sentiment_count > 0 {
            Some(self.sentiment_sum / self.sentiment_count as f64)
        } else {
            None
        };

        Some(AggregatedMetrics {
            symbol: self.symbol,
            window_start: self.window_start,
            window_end: self.window_end,
            avg_price,
            min_price: self.min_price,
            max_price: self.max_price,
            vwap,
            total_volume: self.sum_volume,
            trade_count: self.count,
            price_volatility,
            price_range: self.max_price - self.min_price,
            avg_sentiment,
            sentiment_count: self.sentiment_count,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
