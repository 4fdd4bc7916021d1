pub mod broadcast;
pub mod subscriber;

// Re-export the hub types for convenient access (e.g. `use crate::hub::BroadcastHub`).
pub use broadcast::BroadcastHub;
pub use subscriber::{DeliveryError, Subscriber, SubscriberId};
