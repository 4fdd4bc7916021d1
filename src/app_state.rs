// =============================================================================
// Central Application State — coinpulse engine
// =============================================================================
//
// Shared state for the API surface and the ingestion pipeline. Subsystems
// that own mutable state (the broadcast hub's registry, the aggregator's
// open-window table) keep it to themselves; AppState carries the config, the
// hub handle, the degraded-health flag, and the observability counters.
//
// Thread safety:
//   - AtomicU64 counters for the lock-free ingest stats.
//   - parking_lot::RwLock for the degraded-feed reason.
//   - Arc wrappers for the hub.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::hub::BroadcastHub;
use crate::runtime_config::RuntimeConfig;

// =============================================================================
// Ingest statistics
// =============================================================================

/// Lock-free counters for everything the pipeline counts rather than fails
/// on: malformed messages, late events, queue drops, reconnects.
#[derive(Default)]
pub struct IngestStats {
    pub ticks_ingested: AtomicU64,
    pub trades_ingested: AtomicU64,
    pub malformed_dropped: AtomicU64,
    pub late_dropped: AtomicU64,
    pub hub_queue_dropped: AtomicU64,
    pub aggregator_queue_dropped: AtomicU64,
    pub reconnects: AtomicU64,
    pub windows_emitted: AtomicU64,
    pub alerts_emitted: AtomicU64,
}

/// Serialisable snapshot of [`IngestStats`] for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatsSnapshot {
    pub ticks_ingested: u64,
    pub trades_ingested: u64,
    pub malformed_dropped: u64,
    pub late_dropped: u64,
    pub hub_queue_dropped: u64,
    pub aggregator_queue_dropped: u64,
    pub reconnects: u64,
    pub windows_emitted: u64,
    pub alerts_emitted: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            ticks_ingested: self.ticks_ingested.load(Ordering::Relaxed),
            trades_ingested: self.trades_ingested.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            late_dropped: self.late_dropped.load(Ordering::Relaxed),
            hub_queue_dropped: self.hub_queue_dropped.load(Ordering::Relaxed),
            aggregator_queue_dropped: self.aggregator_queue_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// AppState
// =============================================================================

/// Central state shared across async tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: RuntimeConfig,
    pub hub: Arc<BroadcastHub>,
    pub stats: Arc<IngestStats>,

    /// Set to a reason string after too many consecutive failed upstream
    /// connection attempts; cleared on the next successful connect.
    pub feed_degraded: RwLock<Option<String>>,

    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        let hub = Arc::new(BroadcastHub::new(config.symbols.clone()));
        Self {
            config,
            hub,
            stats: Arc::new(IngestStats::default()),
            feed_degraded: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_snapshot_reflects_counters() {
        let stats = IngestStats::default();
        stats.ticks_ingested.fetch_add(3, Ordering::Relaxed);
        stats.late_dropped.fetch_add(1, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.ticks_ingested, 3);
        assert_eq!(snap.late_dropped, 1);
        assert_eq!(snap.malformed_dropped, 0);
    }

    #[test]
    fn new_state_starts_healthy() {
        let state = AppState::new(RuntimeConfig::default());
        assert!(state.feed_degraded.read().is_none());
        assert_eq!(state.stats.snapshot().reconnects, 0);
    }
}
