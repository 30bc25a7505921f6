//! Facts emitted by the movement and order state machines.

use chrono::{DateTime, Utc};

/// A change decided by an aggregate's `handle` and folded in by `apply`.
///
/// `event_type` doubles as the routing key when an event is forwarded onto
/// an [`EventBus`](crate::EventBus).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, e.g. `"order.confirmed"`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version; bump when a field changes meaning.
    fn schema_version(&self) -> u32 {
        1
    }

    /// Business time of the change.
    fn occurred_at(&self) -> DateTime<Utc>;
}
