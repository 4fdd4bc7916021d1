// =============================================================================
// Anomaly Detector — per-tick price-spike and volume-surge rules
// =============================================================================
//
// Two independent rules are evaluated on every ticker update:
//
//   price spike:  change >  10 % -> high,  >  5 % -> medium
//                 change < -10 % -> high,  < -5 % -> medium
//   volume surge: 24h volume > 1e9 -> high, > 5e8 -> medium
//
// An alert is produced only when at least one rule lands above `low`.
// Severity is the highest of the fired rules; the alert type and trigger
// value come from the dominant rule (price spike wins a severity tie).
//
// Cooldown is a configurable policy: with `cooldown_secs == 0` every
// qualifying tick re-alerts (the reference behavior, a known alert-storm
// source); with a nonzero cooldown, repeats for the same (symbol, type)
// pair are suppressed until enough event time has passed.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use uuid::Uuid;

use crate::types::{Alert, AlertType, PriceTick, Severity};

// Rule thresholds.
const PRICE_SPIKE_HIGH_PCT: f64 = 10.0;
const PRICE_SPIKE_MEDIUM_PCT: f64 = 5.0;
const VOLUME_SURGE_HIGH: f64 = 1_000_000_000.0;
const VOLUME_SURGE_MEDIUM: f64 = 500_000_000.0;

/// Stateful wrapper around the stateless rules: holds the cooldown ledger and
/// a rolling per-symbol average volume used for ratio context in messages.
pub struct AnomalyDetector {
    /// Event-time seconds a (symbol, type) pair stays quiet after alerting.
    /// Zero disables suppression.
    cooldown_secs: u64,
    /// Last alert event time per (symbol, type), epoch ms.
    last_alert: HashMap<(String, AlertType), i64>,
    /// Recent 24h-volume samples per symbol.
    volume_history: HashMap<String, VecDeque<f64>>,
    volume_samples: usize,
}

impl AnomalyDetector {
    pub fn new(cooldown_secs: u64, volume_samples: usize) -> Self {
        Self {
            cooldown_secs,
            last_alert: HashMap::new(),
            volume_history: HashMap::new(),
            volume_samples: volume_samples.max(1),
        }
    }

    /// Evaluate both rules against a tick. Returns at most one alert.
    ///
    /// The rolling volume average is updated on every call, before rule
    /// evaluation, so the current sample is part of its own average.
    pub fn evaluate(&mut self, tick: &PriceTick) -> Option<Alert> {
        let avg_volume = self.update_volume_average(&tick.symbol, tick.volume_24h);

        let price_severity = tick
            .price_change_24h
            .map(price_spike_severity)
            .unwrap_or(Severity::Low);
        let volume_severity = volume_surge_severity(tick.volume_24h);

        let severity = price_severity.max(volume_severity);
        if severity == Severity::Low {
            return None;
        }

        // Dominant rule: higher severity wins, price spike wins ties.
        let (alert_type, trigger_value) = if price_severity >= volume_severity {
            (AlertType::PriceSpike, tick.price_change_24h.unwrap_or(0.0))
        } else {
            (AlertType::VolumeSurge, tick.volume_24h)
        };

        if self.in_cooldown(&tick.symbol, alert_type, tick.event_time) {
            return None;
        }
        self.last_alert
            .insert((tick.symbol.clone(), alert_type), tick.event_time);

        let message = compose_message(tick, price_severity, volume_severity, avg_volume);

        Some(Alert {
            id: Uuid::new_v4(),
            symbol: tick.symbol.clone(),
            alert_type,
            severity,
            message,
            trigger_value,
            created_at: Utc::now().to_rfc3339(),
            is_active: true,
        })
    }

    fn in_cooldown(&self, symbol: &str, alert_type: AlertType, event_time: i64) -> bool {
        if self.cooldown_secs == 0 {
            return false;
        }
        match self.last_alert.get(&(symbol.to_string(), alert_type)) {
            Some(&last) => event_time - last < self.cooldown_secs as i64 * 1000,
            None => false,
        }
    }

    /// Push a volume sample and return the rolling mean, if any history
    /// existed before this sample.
    fn update_volume_average(&mut self, symbol: &str, volume: f64) -> Option<f64> {
        let history = self
            .volume_history
            .entry(symbol.to_string())
            .or_insert_with(VecDeque::new);
        history.push_back(volume);
        while history.len() > self.volume_samples {
            history.pop_front();
        }
        if history.len() < 2 {
            return None;
        }
        Some(history.iter().sum::<f64>() / history.len() as f64)
    }
}

// =============================================================================
// Rules
// =============================================================================

fn price_spike_severity(change_pct: f64) -> Severity {
    if change_pct > PRICE_SPIKE_HIGH_PCT || change_pct < -PRICE_SPIKE_HIGH_PCT {
        Severity::High
    } else if change_pct > PRICE_SPIKE_MEDIUM_PCT || change_pct < -PRICE_SPIKE_MEDIUM_PCT {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn volume_surge_severity(volume: f64) -> Severity {
    if volume > VOLUME_SURGE_HIGH {
        Severity::High
    } else if volume > VOLUME_SURGE_MEDIUM {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn compose_message(
    tick: &PriceTick,
    price_severity: Severity,
    volume_severity: Severity,
    avg_volume: Option<f64>,
) -> String {
    let mut parts = Vec::new();

    if price_severity > Severity::Low {
        let change = tick.price_change_24h.unwrap_or(0.0);
        let direction = if change >= 0.0 { "up" } else { "down" };
        parts.push(format!(
            "{} price {} {:.2}% over 24h",
            tick.symbol,
            direction,
            change.abs()
        ));
    }

    if volume_severity > Severity::Low {
        let mut part = format!("{} 24h volume at {:.3e}", tick.symbol, tick.volume_24h);
        if let Some(avg) = avg_volume {
            if avg > 0.0 {
                part.push_str(&format!(" ({:.1}x rolling average)", tick.volume_24h / avg));
            }
        }
        parts.push(part);
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, change: Option<f64>, volume: f64, event_time: i64) -> PriceTick {
        PriceTick {
            symbol: symbol.into(),
            price: 45000.0,
            volume_24h: volume,
            price_change_24h: change,
            high_24h: None,
            low_24h: None,
            event_time,
        }
    }

    #[test]
    fn price_spike_above_ten_is_high() {
        let mut d = AnomalyDetector::new(0, 20);
        let alert = d.evaluate(&tick("BTCUSDT", Some(12.0), 1000.0, 0)).unwrap();
        assert_eq!(alert.alert_type, AlertType::PriceSpike);
        assert_eq!(alert.severity, Severity::High);
        assert!((alert.trigger_value - 12.0).abs() < f64::EPSILON);
        assert!(alert.is_active);
    }

    #[test]
    fn small_move_produces_no_alert() {
        let mut d = AnomalyDetector::new(0, 20);
        assert!(d.evaluate(&tick("BTCUSDT", Some(3.0), 1000.0, 0)).is_none());
    }

    #[test]
    fn negative_spike_severities() {
        let mut d = AnomalyDetector::new(0, 20);
        let high = d.evaluate(&tick("A", Some(-11.0), 0.0, 0)).unwrap();
        assert_eq!(high.severity, Severity::High);
        let medium = d.evaluate(&tick("B", Some(-6.0), 0.0, 0)).unwrap();
        assert_eq!(medium.severity, Severity::Medium);
    }

    #[test]
    fn volume_surge_thresholds() {
        let mut d = AnomalyDetector::new(0, 20);
        let high = d.evaluate(&tick("A", None, 1.5e9, 0)).unwrap();
        assert_eq!(high.alert_type, AlertType::VolumeSurge);
        assert_eq!(high.severity, Severity::High);

        let medium = d.evaluate(&tick("B", None, 6e8, 0)).unwrap();
        assert_eq!(medium.severity, Severity::Medium);

        assert!(d.evaluate(&tick("C", None, 4e8, 0)).is_none());
    }

    #[test]
    fn missing_price_change_skips_price_rule() {
        let mut d = AnomalyDetector::new(0, 20);
        assert!(d.evaluate(&tick("BTCUSDT", None, 1000.0, 0)).is_none());
    }

    #[test]
    fn both_rules_fire_highest_severity_dominant_type() {
        let mut d = AnomalyDetector::new(0, 20);
        // Medium price spike + high volume surge -> volume surge wins.
        let alert = d.evaluate(&tick("BTCUSDT", Some(6.0), 2e9, 0)).unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.alert_type, AlertType::VolumeSurge);
        assert!((alert.trigger_value - 2e9).abs() < f64::EPSILON);
        assert!(alert.message.contains("price"));
        assert!(alert.message.contains("volume"));

        // Equal severities -> price spike wins the tie.
        let alert = d.evaluate(&tick("ETHUSDT", Some(11.0), 2e9, 0)).unwrap();
        assert_eq!(alert.alert_type, AlertType::PriceSpike);
    }

    #[test]
    fn no_cooldown_realerts_every_tick() {
        let mut d = AnomalyDetector::new(0, 20);
        assert!(d.evaluate(&tick("BTCUSDT", Some(12.0), 0.0, 0)).is_some());
        assert!(d.evaluate(&tick("BTCUSDT", Some(12.0), 0.0, 1000)).is_some());
        assert!(d.evaluate(&tick("BTCUSDT", Some(12.0), 0.0, 2000)).is_some());
    }

    #[test]
    fn cooldown_suppresses_repeats_until_elapsed() {
        let mut d = AnomalyDetector::new(60, 20);
        assert!(d.evaluate(&tick("BTCUSDT", Some(12.0), 0.0, 0)).is_some());
        // 30s later: suppressed.
        assert!(d.evaluate(&tick("BTCUSDT", Some(12.0), 0.0, 30_000)).is_none());
        // 61s later: fires again.
        assert!(d.evaluate(&tick("BTCUSDT", Some(12.0), 0.0, 61_000)).is_some());
    }

    #[test]
    fn cooldown_is_per_symbol_and_type() {
        let mut d = AnomalyDetector::new(60, 20);
        assert!(d.evaluate(&tick("BTCUSDT", Some(12.0), 0.0, 0)).is_some());
        // Different symbol is unaffected.
        assert!(d.evaluate(&tick("ETHUSDT", Some(12.0), 0.0, 0)).is_some());
        // Same symbol, different rule type is unaffected.
        assert!(d.evaluate(&tick("BTCUSDT", None, 2e9, 1000)).is_some());
    }

    #[test]
    fn volume_ratio_appears_in_message_with_history() {
        let mut d = AnomalyDetector::new(0, 20);
        d.evaluate(&tick("BTCUSDT", None, 4e8, 0));
        d.evaluate(&tick("BTCUSDT", None, 4e8, 1000));
        let alert = d.evaluate(&tick("BTCUSDT", None, 2e9, 2000)).unwrap();
        assert!(alert.message.contains("rolling average"));
    }
}
