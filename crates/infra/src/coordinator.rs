//! Fulfillment coordinator: the entry point for order fulfillment.
//!
//! ```text
//! caller
//!   ↓
//! FulfillmentCoordinator ── deadline per call (config.lock_timeout)
//!   ↓
//! OrderController ── CAS on the order, movements + ledger for stock
//!   ↓ (on success only)
//! OrderEventSink ── best effort; failures are logged and dropped
//! ```
//!
//! A notification is sent only after the transition is stored. A failing sink
//! never turns a successful transition into an error.

use std::time::Duration;

use tracing::warn;

use storekeep_core::{Deadline, UserId};
use storekeep_orders::{Order, OrderId, OrderNumberGenerator};

use crate::catalog::Catalog;
use crate::config::FulfillmentConfig;
use crate::error::FulfillmentResult;
use crate::event_sink::OrderEventSink;
use crate::orders::{Cancellation, NewOrder, OrderController, StatusChange};
use crate::store::{MovementStore, OrderStore, StockLevelStore};

#[derive(Debug)]
pub struct FulfillmentCoordinator<S, G, C, K> {
    orders: OrderController<S, G, C>,
    sink: K,
    timeout: Duration,
}

impl<S: Clone, G, C, K> FulfillmentCoordinator<S, G, C, K> {
    pub fn new(store: S, numbers: G, catalog: C, sink: K, config: &FulfillmentConfig) -> Self {
        Self {
            orders: OrderController::new(store, numbers, catalog, config),
            sink,
            timeout: config.lock_timeout,
        }
    }
}

impl<S, G, C, K> FulfillmentCoordinator<S, G, C, K> {
    /// Full order API (queries, edits and the remaining transitions).
    pub fn orders(&self) -> &OrderController<S, G, C> {
        &self.orders
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    fn deadline(&self) -> Deadline {
        Deadline::within(self.timeout)
    }
}

impl<S, G, C, K> FulfillmentCoordinator<S, G, C, K>
where
    S: OrderStore + MovementStore + StockLevelStore,
    G: OrderNumberGenerator,
    C: Catalog,
    K: OrderEventSink,
{
    pub fn create_order(&self, request: NewOrder) -> FulfillmentResult<Order> {
        let order = self.orders.create(request)?;
        if let Err(e) = self.sink.on_order_created(&order) {
            warn!(order_id = %order.id_typed(), error = %e, "order created notification failed");
        }
        Ok(order)
    }

    pub fn confirm_order(&self, id: OrderId, actor: UserId) -> FulfillmentResult<Order> {
        let change = self.orders.confirm(id, actor, self.deadline())?;
        Ok(self.notify(change))
    }

    /// The sink hears about every stored cancellation, including one whose
    /// restock failed; that failure is still returned to the caller.
    pub fn cancel_order(&self, id: OrderId, reason: &str, actor: UserId) -> FulfillmentResult<Order> {
        let Cancellation { change, restock } =
            self.orders.cancel(id, reason, actor, self.deadline())?;
        let order = self.notify(change);
        restock.map(|()| order)
    }

    pub fn ship_order(
        &self,
        id: OrderId,
        tracking_number: &str,
        note: Option<String>,
    ) -> FulfillmentResult<Order> {
        let change = self
            .orders
            .ship(id, tracking_number, note, self.deadline())?;
        Ok(self.notify(change))
    }

    pub fn deliver_order(&self, id: OrderId, note: Option<String>) -> FulfillmentResult<Order> {
        let change = self.orders.deliver(id, note, self.deadline())?;
        Ok(self.notify(change))
    }

    fn notify(&self, change: StatusChange) -> Order {
        let to = change.to();
        if let Err(e) = self
            .sink
            .on_order_status_updated(&change.order, change.from, to)
        {
            warn!(
                order_id = %change.order.id_typed(),
                from = change.from.as_str(),
                to = to.as_str(),
                error = %e,
                "order status notification failed"
            );
        }
        change.order
    }
}
