//! Best-effort order notifications.
//!
//! The coordinator calls a sink after a transition has been stored. Sink
//! errors are reported back but never undo the transition.

use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tracing::info;
use uuid::Uuid;

use storekeep_core::AggregateRoot;
use storekeep_events::{EventBus, EventEnvelope};
use storekeep_orders::{Order, OrderStatus};

pub const ORDER_AGGREGATE_TYPE: &str = "order";
pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_STATUS_UPDATED: &str = "order.status_updated";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Receiver of order notifications (email, webhooks, analytics...).
pub trait OrderEventSink: Send + Sync {
    fn on_order_created(&self, order: &Order) -> Result<(), SinkError>;

    fn on_order_status_updated(
        &self,
        order: &Order,
        old: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), SinkError>;
}

impl<T> OrderEventSink for std::sync::Arc<T>
where
    T: OrderEventSink + ?Sized,
{
    fn on_order_created(&self, order: &Order) -> Result<(), SinkError> {
        (**self).on_order_created(order)
    }

    fn on_order_status_updated(
        &self,
        order: &Order,
        old: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), SinkError> {
        (**self).on_order_status_updated(order, old, new)
    }
}

/// Publishes JSON envelopes onto an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusEventSink<B> {
    bus: B,
}

impl<B> BusEventSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> BusEventSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn publish(&self, order: &Order, event_type: &str, payload: JsonValue) -> Result<(), SinkError> {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            order.id_typed().0,
            ORDER_AGGREGATE_TYPE,
            order.version(),
            event_type,
            Utc::now(),
            payload,
        );
        self.bus
            .publish(envelope)
            .map_err(|e| SinkError::Publish(format!("{e:?}")))
    }
}

impl<B> OrderEventSink for BusEventSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn on_order_created(&self, order: &Order) -> Result<(), SinkError> {
        let payload = json!({
            "order_id": order.id_typed().to_string(),
            "order_number": order.order_number().map(|n| n.as_str()),
            "customer_email": order.customer().map(|c| c.email.as_str()),
            "status": order.status().as_str(),
            "total_amount": order.totals().total_amount,
        });
        self.publish(order, ORDER_CREATED, payload)
    }

    fn on_order_status_updated(
        &self,
        order: &Order,
        old: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), SinkError> {
        let payload = json!({
            "order_id": order.id_typed().to_string(),
            "order_number": order.order_number().map(|n| n.as_str()),
            "old_status": old.as_str(),
            "new_status": new.as_str(),
        });
        self.publish(order, ORDER_STATUS_UPDATED, payload)
    }
}

/// Logs notifications and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl OrderEventSink for TracingEventSink {
    fn on_order_created(&self, order: &Order) -> Result<(), SinkError> {
        info!(
            order_id = %order.id_typed(),
            order_number = order.order_number().map(|n| n.as_str()),
            "order created"
        );
        Ok(())
    }

    fn on_order_status_updated(
        &self,
        order: &Order,
        old: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), SinkError> {
        info!(
            order_id = %order.id_typed(),
            old = old.as_str(),
            new = new.as_str(),
            "order status updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storekeep_events::InMemoryEventBus;
    use storekeep_orders::OrderId;

    #[test]
    fn status_updates_are_published_as_envelopes() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sub = bus.subscribe();
        let sink = BusEventSink::new(bus);

        let order = Order::empty(OrderId::generate());
        sink.on_order_status_updated(&order, OrderStatus::Pending, OrderStatus::Confirmed)
            .unwrap();

        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.event_type(), ORDER_STATUS_UPDATED);
        assert_eq!(envelope.aggregate_type(), ORDER_AGGREGATE_TYPE);
        assert_eq!(envelope.aggregate_id(), order.id_typed().0);
        assert_eq!(envelope.payload()["old_status"], "pending");
        assert_eq!(envelope.payload()["new_status"], "confirmed");
    }

    #[test]
    fn tracing_sink_never_fails() {
        let order = Order::empty(OrderId::generate());
        assert!(TracingEventSink.on_order_created(&order).is_ok());
    }
}
