// =============================================================================
// Sentiment Policy — price-action sentiment scoring
// =============================================================================
//
// Pure, total mapping from a 24h price-change percentage to a sentiment score
// and confidence. Large positive change reads bullish, large negative change
// bearish. Consumed by the window aggregator when folding sentiment into a
// window; never fails.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Result of scoring one price-change observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// Score in [-1.0, 1.0]; 0.0 is neutral.
    pub sentiment: f64,
    /// Confidence in [0.0, 1.0].
    pub confidence: f64,
    pub label: &'static str,
}

/// Map a 24h price-change percentage to a sentiment score.
///
/// Total over all inputs: non-finite values score neutral.
pub fn score(price_change_pct: f64) -> SentimentScore {
    if !price_change_pct.is_finite() {
        return SentimentScore {
            sentiment: 0.0,
            confidence: 0.5,
            label: "neutral",
        };
    }

    let (sentiment, confidence, label) = if price_change_pct > 10.0 {
        (1.0, 0.9, "very_bullish")
    } else if price_change_pct > 5.0 {
        (0.7, 0.8, "bullish")
    } else if price_change_pct > 2.0 {
        (0.4, 0.6, "slightly_bullish")
    } else if price_change_pct > -2.0 {
        (0.0, 0.5, "neutral")
    } else if price_change_pct > -5.0 {
        (-0.4, 0.6, "slightly_bearish")
    } else if price_change_pct > -10.0 {
        (-0.7, 0.8, "bearish")
    } else {
        (-1.0, 0.9, "very_bearish")
    };

    SentimentScore {
        sentiment,
        confidence,
        label,
    }
}
