// =============================================================================
// WebSocket Handler — downstream subscriber connections
// =============================================================================
//
// Clients connect to `/api/v1/ws` and drive their subscriptions with JSON
// control messages:
//
//   { "action": "subscribe",   "symbol": "BTCUSDT" }
//   { "action": "unsubscribe", "symbol": "BTCUSDT" }
//
// The handler replies with subscription confirmations and then pushes every
// routed event for the client's symbols, tagged `price_update` / `trade`.
// No historical backlog is replayed: a subscriber sees only events routed at
// or after its subscribe call.
//
// Each connection registers a `ChannelSubscriber` with the broadcast hub: a
// bounded outbound queue drained by this handler. A full queue drops the
// newest event for this subscriber only; a closed queue tells the hub the
// transport is gone and the hub removes the subscriber.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::hub::{DeliveryError, Subscriber, SubscriberId};
use crate::types::MarketEvent;

// =============================================================================
// Channel-backed subscriber handle
// =============================================================================

/// The hub-facing half of a WebSocket connection: a stable id plus a bounded,
/// non-blocking outbound queue.
pub struct ChannelSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<MarketEvent>,
    dropped: AtomicU64,
}

impl ChannelSubscriber {
    pub fn new(depth: usize) -> (Arc<Self>, mpsc::Receiver<MarketEvent>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            Arc::new(Self {
                id: Uuid::new_v4(),
                tx,
                dropped: AtomicU64::new(0),
            }),
            rx,
        )
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn send(&self, event: &MarketEvent) -> Result<(), DeliveryError> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Drop-newest for this subscriber; the connection stays up.
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError),
        }
    }
}

// =============================================================================
// Control protocol
// =============================================================================

#[derive(Deserialize)]
struct ClientCommand {
    action: String,
    #[serde(default)]
    symbol: String,
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single subscriber connection lifecycle.
///
/// Runs two concurrent flows via `tokio::select!`:
///   1. **Push loop** — drain the subscriber's outbound queue into the socket.
///   2. **Recv loop** — process subscribe/unsubscribe commands, Ping/Pong,
///      and Close frames.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (subscriber, mut events) =
        ChannelSubscriber::new(state.config.subscriber_queue_depth);
    let id = subscriber.id();
    state.hub.connect(subscriber.clone());

    use futures_util::{SinkExt, StreamExt};
    let (mut sender, mut receiver) = socket.split();

    // Connection banner, mirroring the subscribe confirmations below.
    let banner = serde_json::json!({
        "type": "connection",
        "status": "connected",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if sender
        .send(Message::Text(banner.to_string()))
        .await
        .is_err()
    {
        state.hub.disconnect(id);
        return;
    }

    loop {
        tokio::select! {
            // ── Push loop: routed events for this subscriber ─────────────
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(subscriber = %id, error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(e) => {
                        // Serialisation errors are not network errors; don't disconnect.
                        warn!(subscriber = %id, error = %e, "failed to serialize event");
                    }
                }
            }

            // ── Recv loop: control messages ──────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&state, id, &text) {
                            if sender.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!(subscriber = %id, "WebSocket Close frame received");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(subscriber = %id, "binary message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.hub.disconnect(id);
    if subscriber.dropped_count() > 0 {
        debug!(
            subscriber = %id,
            dropped = subscriber.dropped_count(),
            "subscriber closed with dropped events"
        );
    }
    info!(subscriber = %id, "WebSocket connection closed — cleanup complete");
}

/// Apply one control command. Returns the confirmation frame to send back,
/// if any. Malformed commands are ignored.
fn handle_command(state: &Arc<AppState>, id: SubscriberId, text: &str) -> Option<String> {
    let cmd: ClientCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!(subscriber = %id, error = %e, "ignoring malformed client command");
            return None;
        }
    };

    let symbol = cmd.symbol.to_uppercase();
    match cmd.action.as_str() {
        "subscribe" => {
            if state.hub.subscribe(id, &symbol) {
                Some(
                    serde_json::json!({
                        "type": "subscription",
                        "status": "subscribed",
                        "symbol": symbol,
                    })
                    .to_string(),
                )
            } else {
                // Untracked symbol: rejected as a no-op, no delivery ever.
                None
            }
        }
        "unsubscribe" => {
            state.hub.unsubscribe(id, &symbol);
            Some(
                serde_json::json!({
                    "type": "subscription",
                    "status": "unsubscribed",
                    "symbol": symbol,
                })
                .to_string(),
            )
        }
        other => {
            debug!(subscriber = %id, action = %other, "unknown client action ignored");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
