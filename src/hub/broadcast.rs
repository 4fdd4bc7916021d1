// =============================================================================
// Broadcast Hub — subscription-aware event fan-out
// =============================================================================
//
// Holds the subscription registry: a forward map (symbol -> subscriber ids)
// and an inverse map (subscriber id -> symbols), kept mutually consistent so
// a disconnect cleans up in O(subscriptions) without scanning every symbol.
//
// One RwLock guards the whole registry. Routing takes a read lock for the
// delivery pass; failed subscribers are collected and removed in a single
// write pass inside the same routing call. Subscribe/unsubscribe traffic is
// far rarer than routing, so the single lock is sufficient.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::hub::subscriber::{Subscriber, SubscriberId};
use crate::types::MarketEvent;

#[derive(Default)]
struct Registry {
    /// symbol -> subscribers of that symbol.
    by_symbol: HashMap<String, HashSet<SubscriberId>>,
    /// subscriber -> symbols it subscribed to. Inverse of `by_symbol`.
    by_subscriber: HashMap<SubscriberId, HashSet<String>>,
    /// Live handles for connected subscribers.
    handles: HashMap<SubscriberId, Arc<dyn Subscriber>>,
}

/// Subscription-aware broadcast hub for normalized market events.
pub struct BroadcastHub {
    registry: RwLock<Registry>,
    /// Symbols the engine tracks. Subscriptions outside this set are no-ops.
    tracked_symbols: HashSet<String>,
}

impl BroadcastHub {
    pub fn new(tracked_symbols: Vec<String>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            tracked_symbols: tracked_symbols.into_iter().collect(),
        }
    }

    /// Register a connected subscriber. It receives nothing until it
    /// subscribes to at least one symbol.
    pub fn connect(&self, subscriber: Arc<dyn Subscriber>) {
        let id = subscriber.id();
        let mut reg = self.registry.write();
        reg.handles.insert(id, subscriber);
        reg.by_subscriber.entry(id).or_default();
        info!(subscriber = %id, "subscriber connected");
    }

    /// Subscribe a client to a symbol. Unknown clients and untracked symbols
    /// are no-ops.
    pub fn subscribe(&self, id: SubscriberId, symbol: &str) -> bool {
        if !self.tracked_symbols.contains(symbol) {
            warn!(subscriber = %id, symbol = %symbol, "subscribe rejected: symbol not tracked");
            return false;
        }

        let mut reg = self.registry.write();
        if !reg.handles.contains_key(&id) {
            return false;
        }
        reg.by_symbol
            .entry(symbol.to_string())
            .or_default()
            .insert(id);
        reg.by_subscriber
            .entry(id)
            .or_default()
            .insert(symbol.to_string());
        debug!(subscriber = %id, symbol = %symbol, "subscribed");
        true
    }

    /// Unsubscribe a client from a symbol. A no-op for unknown pairs.
    pub fn unsubscribe(&self, id: SubscriberId, symbol: &str) {
        let mut reg = self.registry.write();
        if let Some(subs) = reg.by_symbol.get_mut(symbol) {
            subs.remove(&id);
            if subs.is_empty() {
                reg.by_symbol.remove(symbol);
            }
        }
        if let Some(symbols) = reg.by_subscriber.get_mut(&id) {
            symbols.remove(symbol);
        }
        debug!(subscriber = %id, symbol = %symbol, "unsubscribed");
    }

    /// Remove a subscriber from both maps and drop its handle. Idempotent.
    pub fn disconnect(&self, id: SubscriberId) {
        let mut reg = self.registry.write();
        Self::remove_locked(&mut reg, id);
    }

    fn remove_locked(reg: &mut Registry, id: SubscriberId) {
        if reg.handles.remove(&id).is_none() {
            // Already gone; double-disconnect is a no-op.
            return;
        }
        if let Some(symbols) = reg.by_subscriber.remove(&id) {
            for symbol in symbols {
                if let Some(subs) = reg.by_symbol.get_mut(&symbol) {
                    subs.remove(&id);
                    if subs.is_empty() {
                        reg.by_symbol.remove(&symbol);
                    }
                }
            }
        }
        info!(subscriber = %id, "subscriber disconnected");
    }

    /// Deliver an event to every current subscriber of its symbol.
    ///
    /// Delivery failures never surface to the caller: failing subscribers are
    /// collected during the pass and removed afterwards, inside this call.
    /// Returns the number of successful deliveries.
    pub fn route(&self, event: &MarketEvent) -> usize {
        let mut failed: Vec<SubscriberId> = Vec::new();
        let mut delivered = 0usize;

        {
            let reg = self.registry.read();
            let Some(subs) = reg.by_symbol.get(event.symbol()) else {
                return 0;
            };
            for id in subs {
                let Some(handle) = reg.handles.get(id) else {
                    continue;
                };
                match handle.send(event) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        debug!(subscriber = %id, error = %e, "delivery failed, scheduling removal");
                        failed.push(*id);
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut reg = self.registry.write();
            for id in failed {
                Self::remove_locked(&mut reg, id);
            }
        }

        delivered
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.read().handles.len()
    }

    /// Number of subscribers registered for a symbol.
    pub fn symbol_subscriber_count(&self, symbol: &str) -> usize {
        self.registry
            .read()
            .by_symbol
            .get(symbol)
            .map_or(0, HashSet::len)
    }
}

// =============================================================================
// Tests
// =============================================================================
