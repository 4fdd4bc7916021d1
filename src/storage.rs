// =============================================================================
// Storage Collaborator Boundary
// =============================================================================
//
// The engine hands closed windows and alerts to an external storage
// collaborator. Both appends are fire-and-forget from this side: the
// collaborator owns retries and failure logging, the core never blocks or
// errors on storage.
// =============================================================================

#[cfg(test)]
use parking_lot::Mutex;
use tracing::info;

use crate::types::{Alert, AggregatedMetrics};

/// Append-only sink for the records this engine produces.
pub trait MetricsStore: Send + Sync {
    fn append_aggregated_metrics(&self, record: &AggregatedMetrics);
    fn append_alert(&self, alert: &Alert);
}

// =============================================================================
// LogStore — default wiring
// =============================================================================

/// Emits each record as a structured log line. Stands in for the external
/// persistence service, which is outside this engine's boundary.
pub struct LogStore;

impl MetricsStore for LogStore {
    fn append_aggregated_metrics(&self, record: &AggregatedMetrics) {
        info!(
            symbol = %record.symbol,
            window_start = record.window_start,
            window_end = record.window_end,
            avg_price = record.avg_price,
            vwap = record.vwap,
            total_volume = record.total_volume,
            trade_count = record.trade_count,
            "aggregated metrics emitted"
        );
    }

    fn append_alert(&self, alert: &Alert) {
        info!(
            id = %alert.id,
            symbol = %alert.symbol,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            trigger_value = alert.trigger_value,
            message = %alert.message,
            "alert emitted"
        );
    }
}

// =============================================================================
// RecordingStore — test double
// =============================================================================

/// In-memory store that records every append. Used by tests to assert on
/// emitted windows and alerts.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingStore {
    pub metrics: Mutex<Vec<AggregatedMetrics>>,
    pub alerts: Mutex<Vec<Alert>>,
}

#[cfg(test)]
impl MetricsStore for RecordingStore {
    fn append_aggregated_metrics(&self, record: &AggregatedMetrics) {
        self.metrics.lock().push(record.clone());
    }

    fn append_alert(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}
