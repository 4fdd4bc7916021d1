// =============================================================================
// Subscriber Capability — the hub's view of a downstream client
// =============================================================================
//
// A subscriber is an explicit capability with a stable identity and a
// non-blocking send. The hub never sees the underlying transport; a closed
// or broken transport surfaces as `DeliveryError` and the hub treats it as
// an implicit disconnect.
// =============================================================================

use uuid::Uuid;

use crate::types::MarketEvent;

/// Stable identity for a subscriber, usable as a map key across both
/// registry directions.
pub type SubscriberId = Uuid;

/// Delivery to a subscriber failed because its transport is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryError;

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber transport closed")
    }
}

impl std::error::Error for DeliveryError {}

/// Handle the broadcast hub delivers events through.
///
/// `send` must not block the routing call: implementations hand the event to
/// a bounded outbound queue. A full queue drops the event for that subscriber
/// only; `Err(DeliveryError)` means the transport is closed and the hub
/// should drop the subscriber entirely.
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;
    fn send(&self, event: &MarketEvent) -> Result<(), DeliveryError>;
}
