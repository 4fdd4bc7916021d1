// =============================================================================
// Window Aggregator — tumbling windows closed by watermark
// =============================================================================
//
// Single consumer of the normalized event stream. Owns the open-window table
// exclusively (no locking: only this task touches it). Per event:
//
//   1. Ticks fold into their `(symbol, window_start)` window, opening it on
//      first contact. Trades are never windowed.
//   2. The anomaly detector runs on every tick and may emit an alert.
//   3. The watermark (max observed event time minus the late tolerance)
//      advances, closing every open window whose end it has passed.
//
// A tick whose window already closed is dropped and counted — late data is
// not corrected retroactively. When the ingest channel closes (shutdown),
// every still-open window is flushed to the store before the task returns;
// partial windows are emitted, not discarded.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::aggregator::window::WindowAccumulator;
use crate::anomaly::AnomalyDetector;
use crate::app_state::IngestStats;
use crate::storage::MetricsStore;
use crate::types::{MarketEvent, PriceTick};

pub struct WindowAggregator {
    window_ms: i64,
    late_tolerance_ms: i64,
    open: HashMap<(String, i64), WindowAccumulator>,
    /// Max event time observed across all symbols. The watermark derives
    /// from this, so one stalled symbol cannot hold every window open.
    max_event_time: Option<i64>,
    detector: AnomalyDetector,
    store: Arc<dyn MetricsStore>,
    stats: Arc<IngestStats>,
}

impl WindowAggregator {
    pub fn new(
        window_ms: i64,
        late_tolerance_ms: i64,
        detector: AnomalyDetector,
        store: Arc<dyn MetricsStore>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            window_ms,
            late_tolerance_ms,
            open: HashMap::new(),
            max_event_time: None,
            detector,
            store,
            stats,
        }
    }

    /// Consume events until the channel closes, then flush open windows.
    pub async fn run(mut self, mut rx: mpsc::Receiver<MarketEvent>) {
        info!(
            window_ms = self.window_ms,
            late_tolerance_ms = self.late_tolerance_ms,
            "window aggregator started"
        );

        while let Some(event) = rx.recv().await {
            self.observe(&event);
        }

        let flushed = self.flush();
        info!(flushed, "window aggregator stopped, open windows flushed");
    }

    /// Process one normalized event: fold, detect, advance the watermark.
    pub fn observe(&mut self, event: &MarketEvent) {
        if let MarketEvent::Tick(tick) = event {
            self.fold_tick(tick);
            if let Some(alert) = self.detector.evaluate(tick) {
                self.store.append_alert(&alert);
                self.stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Every observed event advances the watermark, trades included.
        let advanced = match self.max_event_time {
            Some(max) => event.event_time() > max,
            None => true,
        };
        if advanced {
            self.max_event_time = Some(event.event_time());
            self.close_due_windows();
        }
    }

    fn fold_tick(&mut self, tick: &PriceTick) {
        let window_start = tick.event_time - tick.event_time.rem_euclid(self.window_ms);
        let window_end = window_start + self.window_ms;

        if let Some(watermark) = self.watermark() {
            if window_end <= watermark {
                // The window this tick belongs to has already closed.
                self.stats.late_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    symbol = %tick.symbol,
                    event_time = tick.event_time,
                    window_start,
                    "late tick dropped"
                );
                return;
            }
        }

        self.open
            .entry((tick.symbol.clone(), window_start))
            .or_insert_with(|| {
                WindowAccumulator::new(tick.symbol.clone(), window_start, window_end)
            })
            .fold(tick);
    }

    fn watermark(&self) -> Option<i64> {
        self.max_event_time.map(|max| max - self.late_tolerance_ms)
    }

    fn close_due_windows(&mut self) {
        let Some(watermark) = self.watermark() else {
            return;
        };

        let due: Vec<(String, i64)> = self
            .open
            .iter()
            .filter(|(_, acc)| acc.window_end() <= watermark)
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            if let Some(acc) = self.open.remove(&key) {
                self.emit(acc);
            }
        }
    }

    fn emit(&self, acc: WindowAccumulator) {
        if let Some(metrics) = acc.finalize() {
            self.store.append_aggregated_metrics(&metrics);
            self.stats.windows_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Finalize and emit every open window. Returns the number emitted.
    /// Called on shutdown; flushing (rather than discarding) partial windows
    /// is the engine's stated exit policy.
    pub fn flush(&mut self) -> usize {
        let mut keys: Vec<(String, i64)> = self.open.keys().cloned().collect();
        keys.sort();

        let mut emitted = 0;
        for key in keys {
            if let Some(acc) = self.open.remove(&key) {
                self.emit(acc);
                emitted += 1;
            }
        }
        emitted
    }

    /// Number of currently open windows.
    pub fn open_window_count(&self) -> usize {
        self.open.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordingStore;
    use crate::types::TradeEvent;

    const WINDOW_MS: i64 = 300_000; // 5 minutes
    const TOLERANCE_MS: i64 = 600_000; // 10 minutes

    fn engine(store: Arc<RecordingStore>) -> WindowAggregator {
        WindowAggregator::new(
            WINDOW_MS,
            TOLERANCE_MS,
            AnomalyDetector::new(0, 20),
            store,
            Arc::new(IngestStats::default()),
        )
    }

    fn tick_at(symbol: &str, time: i64, price: f64, volume: f64) -> MarketEvent {
        MarketEvent::Tick(PriceTick {
            symbol: symbol.into(),
            price,
            volume_24h: volume,
            price_change_24h: None,
            high_24h: None,
            low_24h: None,
            event_time: time,
        })
    }

    #[test]
    fn five_minute_window_end_to_end() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        // Ticks at 00:00:10, 00:02:00, 00:04:50.
        agg.observe(&tick_at("BTCUSDT", 10_000, 100.0, 10.0));
        agg.observe(&tick_at("BTCUSDT", 120_000, 102.0, 20.0));
        agg.observe(&tick_at("BTCUSDT", 290_000, 98.0, 5.0));
        assert_eq!(agg.open_window_count(), 1);
        assert!(store.metrics.lock().is_empty());

        // Advance the watermark past 00:05:00: needs an event at or after
        // window_end + tolerance.
        agg.observe(&tick_at("BTCUSDT", WINDOW_MS + TOLERANCE_MS, 99.0, 1.0));

        let metrics = store.metrics.lock();
        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];
        assert_eq!(m.symbol, "BTCUSDT");
        assert_eq!(m.window_start, 0);
        assert_eq!(m.window_end, WINDOW_MS);
        assert!((m.avg_price - 100.0).abs() < 1e-9);
        assert_eq!(m.min_price, 98.0);
        assert_eq!(m.max_price, 102.0);
        assert_eq!(m.trade_count, 3);
        let expected_vwap = (100.0 * 10.0 + 102.0 * 20.0 + 98.0 * 5.0) / 35.0;
        assert!((m.vwap - expected_vwap).abs() < 1e-9);
    }

    #[test]
    fn ticks_land_in_epoch_aligned_windows() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        agg.observe(&tick_at("BTCUSDT", 10_000, 100.0, 1.0));
        agg.observe(&tick_at("BTCUSDT", 310_000, 101.0, 1.0));
        agg.observe(&tick_at("ETHUSDT", 10_000, 2500.0, 1.0));

        // Two symbols, first symbol spans two windows.
        assert_eq!(agg.open_window_count(), 3);
    }

    #[test]
    fn late_tick_is_dropped_and_window_unchanged() {
        let store = Arc::new(RecordingStore::default());
        let stats = Arc::new(IngestStats::default());
        let mut agg = WindowAggregator::new(
            WINDOW_MS,
            TOLERANCE_MS,
            AnomalyDetector::new(0, 20),
            store.clone(),
            stats.clone(),
        );

        agg.observe(&tick_at("BTCUSDT", 10_000, 100.0, 10.0));
        // Close the first window.
        agg.observe(&tick_at("BTCUSDT", WINDOW_MS + TOLERANCE_MS, 105.0, 1.0));
        assert_eq!(store.metrics.lock().len(), 1);
        let emitted_avg = store.metrics.lock()[0].avg_price;

        // A straggler for the closed window: dropped, nothing re-emitted.
        agg.observe(&tick_at("BTCUSDT", 20_000, 999.0, 1.0));
        assert_eq!(stats.late_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(store.metrics.lock().len(), 1);
        assert!((store.metrics.lock()[0].avg_price - emitted_avg).abs() < 1e-9);
    }

    #[test]
    fn watermark_is_global_across_symbols() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        agg.observe(&tick_at("BTCUSDT", 10_000, 100.0, 1.0));
        // A different symbol advances event time far enough to close the
        // BTCUSDT window.
        agg.observe(&tick_at("ETHUSDT", WINDOW_MS + TOLERANCE_MS, 2500.0, 1.0));

        let metrics = store.metrics.lock();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].symbol, "BTCUSDT");
    }

    #[test]
    fn trades_advance_watermark_but_are_not_windowed() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        agg.observe(&tick_at("BTCUSDT", 10_000, 100.0, 1.0));
        agg.observe(&MarketEvent::Trade(TradeEvent {
            symbol: "BTCUSDT".into(),
            price: 100.5,
            quantity: 0.1,
            is_buyer_maker: false,
            event_time: WINDOW_MS + TOLERANCE_MS,
        }));

        let metrics = store.metrics.lock();
        assert_eq!(metrics.len(), 1);
        // The trade itself contributed nothing to the window.
        assert_eq!(metrics[0].trade_count, 1);
        assert!((metrics[0].avg_price - 100.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_within_tolerance_still_folds() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        agg.observe(&tick_at("BTCUSDT", 400_000, 101.0, 1.0));
        // Earlier event time, but its window has not closed yet.
        agg.observe(&tick_at("BTCUSDT", 290_000, 100.0, 1.0));
        assert_eq!(agg.open_window_count(), 2);

        agg.observe(&tick_at("BTCUSDT", WINDOW_MS + TOLERANCE_MS, 102.0, 1.0));
        let metrics = store.metrics.lock();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].trade_count, 1);
        assert!((metrics[0].avg_price - 100.0).abs() < 1e-9);
    }

    #[test]
    fn flush_emits_open_windows() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        agg.observe(&tick_at("BTCUSDT", 10_000, 100.0, 1.0));
        agg.observe(&tick_at("ETHUSDT", 20_000, 2500.0, 1.0));
        assert!(store.metrics.lock().is_empty());

        let flushed = agg.flush();
        assert_eq!(flushed, 2);
        assert_eq!(agg.open_window_count(), 0);
        assert_eq!(store.metrics.lock().len(), 2);
    }

    #[test]
    fn anomalous_tick_emits_alert_through_store() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        agg.observe(&MarketEvent::Tick(PriceTick {
            symbol: "BTCUSDT".into(),
            price: 45000.0,
            volume_24h: 1000.0,
            price_change_24h: Some(12.0),
            high_24h: None,
            low_24h: None,
            event_time: 10_000,
        }));

        let alerts = store.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, crate::types::Severity::High);
    }

    #[test]
    fn no_synthetic_windows_for_quiet_intervals() {
        let store = Arc::new(RecordingStore::default());
        let mut agg = engine(store.clone());

        // Two ticks three windows apart; the empty windows between them
        // never materialize.
        agg.observe(&tick_at("BTCUSDT", 10_000, 100.0, 1.0));
        agg.observe(&tick_at("BTCUSDT", 4 * WINDOW_MS + 10_000, 101.0, 1.0));
        agg.flush();

        assert_eq!(store.metrics.lock().len(), 2);
    }
}
