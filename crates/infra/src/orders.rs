//! Order lifecycle with stock reservation.
//!
//! Every transition is a compare-and-set on the order's version. Confirm
//! writes the order and the stock it reserves in one ledger commit.
//! Cancelling a confirmed order returns the reserved stock.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use storekeep_core::{Aggregate, AggregateRoot, Deadline, ExpectedVersion, Metadata, UserId};
use storekeep_events::Event;
use storekeep_inventory::{InventoryMovement, MovementId, MovementStatus, MovementType, StockKey};
use storekeep_orders::{
    AddItem, Address, CancelOrder, ConfirmOrder, CustomerInfo, DeliverOrder, Order, OrderCommand,
    OrderId, OrderItem, OrderNumber, OrderNumberGenerator, OrderStatus, PaymentStatus, PlaceOrder,
    RefundOrder, RemoveItem, ReturnOrder, ShipOrder, StartProcessing, TaxRate,
    UpdateOrder, UpdatePaymentStatus,
};

use crate::catalog::{Catalog, LineRequest, snapshot_line};
use crate::config::FulfillmentConfig;
use crate::error::{FulfillmentError, FulfillmentResult};
use crate::movements::{MovementController, NewMovement};
use crate::retry::{RetryPolicy, retry_on_conflict};
use crate::store::{
    MovementFilter, MovementStore, OrderFilter, OrderStore, Page, Pagination, StockLevelStore,
    StoreError, Versioned,
};

/// `reference_type` stamped on movements created for an order.
pub const ORDER_REFERENCE_TYPE: &str = "order";

/// Request to place an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer: CustomerInfo,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub lines: Vec<LineRequest>,
    pub shipping_cost: i64,
    pub discount_amount: i64,
    pub notes: Option<String>,
    pub metadata: Metadata,
}

/// Result of a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub order: Order,
    pub from: OrderStatus,
}

impl StatusChange {
    pub fn to(&self) -> OrderStatus {
        self.order.status()
    }
}

/// A stored cancellation and the outcome of returning its reserved stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub change: StatusChange,
    pub restock: FulfillmentResult<()>,
}

#[derive(Debug)]
pub struct OrderController<S, G, C> {
    store: S,
    movements: MovementController<S>,
    numbers: G,
    catalog: C,
    tax_rate: TaxRate,
    retry: RetryPolicy,
    order_number_attempts: u32,
}

impl<S: Clone, G, C> OrderController<S, G, C> {
    pub fn new(store: S, numbers: G, catalog: C, config: &FulfillmentConfig) -> Self {
        Self {
            movements: MovementController::new(store.clone(), config.retry)
                .with_compensation_timeout(config.lock_timeout),
            store,
            numbers,
            catalog,
            tax_rate: config.tax_rate,
            retry: config.retry,
            order_number_attempts: config.order_number_attempts.max(1),
        }
    }
}

impl<S, G, C> OrderController<S, G, C> {
    pub fn movements(&self) -> &MovementController<S> {
        &self.movements
    }
}

impl<S, G, C> OrderController<S, G, C>
where
    S: OrderStore + MovementStore + StockLevelStore,
    G: OrderNumberGenerator,
    C: Catalog,
{
    pub fn get_order(&self, id: OrderId) -> FulfillmentResult<Order> {
        self.store
            .get_order(id)?
            .ok_or_else(|| FulfillmentError::not_found(format!("order {id}")))
    }

    pub fn get_order_by_number(&self, number: &OrderNumber) -> FulfillmentResult<Order> {
        self.store
            .get_order_by_number(number)?
            .ok_or_else(|| FulfillmentError::not_found(format!("order {number}")))
    }

    pub fn list_orders(
        &self,
        filter: &OrderFilter,
        pagination: Pagination,
    ) -> FulfillmentResult<Page<Order>> {
        Ok(self.store.list_orders(filter, pagination)?)
    }

    /// Place a Pending order, snapshotting every line from the catalog.
    ///
    /// A taken order number is retried with a fresh one, up to the
    /// configured number of attempts.
    #[instrument(skip(self, request), fields(lines = request.lines.len()), err)]
    pub fn create(&self, request: NewOrder) -> FulfillmentResult<Order> {
        let lines = request
            .lines
            .iter()
            .map(|line| snapshot_line(&self.catalog, line))
            .collect::<FulfillmentResult<Vec<_>>>()?;

        let order_id = OrderId::generate();
        for attempt in 1..=self.order_number_attempts {
            let now = Utc::now();
            let order_number = self.numbers.next_number(now.date_naive());

            let mut order = Order::empty(order_id);
            order.execute(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                order_number: order_number.clone(),
                customer: request.customer.clone(),
                shipping_address: request.shipping_address.clone(),
                billing_address: request.billing_address.clone(),
                lines: lines.clone(),
                shipping_cost: request.shipping_cost,
                discount_amount: request.discount_amount,
                tax_rate: self.tax_rate,
                notes: request.notes.clone(),
                metadata: request.metadata.clone(),
                occurred_at: now,
            }))?;

            match self.store.insert_order(&order) {
                Ok(()) => {
                    info!(
                        order_id = %order_id,
                        order_number = %order_number,
                        total = order.totals().total_amount,
                        "order placed"
                    );
                    return Ok(order);
                }
                Err(StoreError::Conflict(reason)) => {
                    debug!(attempt, %order_number, %reason, "order number taken, drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FulfillmentError::Conflict(format!(
            "no free order number after {} attempts",
            self.order_number_attempts
        )))
    }

    #[instrument(skip(self, changes), fields(order_id = %id), err)]
    pub fn update_order(
        &self,
        id: OrderId,
        changes: UpdateOrder,
        deadline: Deadline,
    ) -> FulfillmentResult<Order> {
        let change = self.mutate(id, deadline, "order.update", || OrderCommand::UpdateOrder {
            order_id: id,
            changes: changes.clone(),
            occurred_at: Utc::now(),
        })?;
        Ok(change.order)
    }

    #[instrument(skip(self, line), fields(order_id = %id, product_id = %line.product_id), err)]
    pub fn add_item(
        &self,
        id: OrderId,
        line: LineRequest,
        deadline: Deadline,
    ) -> FulfillmentResult<Order> {
        let line = snapshot_line(&self.catalog, &line)?;
        let change = self.mutate(id, deadline, "order.add_item", || {
            OrderCommand::AddItem(AddItem {
                order_id: id,
                line: line.clone(),
                occurred_at: Utc::now(),
            })
        })?;
        Ok(change.order)
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    pub fn remove_item(
        &self,
        id: OrderId,
        line_no: u32,
        deadline: Deadline,
    ) -> FulfillmentResult<Order> {
        let change = self.mutate(id, deadline, "order.remove_item", || {
            OrderCommand::RemoveItem(RemoveItem {
                order_id: id,
                line_no,
                occurred_at: Utc::now(),
            })
        })?;
        Ok(change.order)
    }

    /// Pending → Confirmed, reserving stock for every item.
    ///
    /// Outbound movements are staged while the order is still Pending. The
    /// status change is then written in the same ledger commit that
    /// completes them, so the order is never Confirmed without its stock.
    /// The commit expects the order at the version read here: a concurrent
    /// confirm, cancel or item edit makes it fail with `InvalidState`. On
    /// any failure the staged movements are cancelled and the order stays
    /// Pending.
    #[instrument(skip(self), fields(order_id = %id), err)]
    pub fn confirm(
        &self,
        id: OrderId,
        actor: UserId,
        deadline: Deadline,
    ) -> FulfillmentResult<StatusChange> {
        let command = || {
            OrderCommand::ConfirmOrder(ConfirmOrder {
                order_id: id,
                occurred_at: Utc::now(),
            })
        };

        let pending = self.get_order(id)?;
        pending.clone().execute(&command())?;
        let number = order_number(&pending)?;

        let requests = pending
            .items()
            .iter()
            .map(|item| {
                NewMovement::new(item_key(item), MovementType::Outbound, item.quantity)
                    .with_reference(number.as_str(), ORDER_REFERENCE_TYPE)
            })
            .collect();
        let staged = self.movements.stage_batch(requests, actor, deadline)?;
        let ids: Vec<MovementId> = staged.iter().map(InventoryMovement::id_typed).collect();

        let mut confirmed = None;
        let committed = self.movements.ledger().apply_movements_with_orders(deadline, || {
            let mut order = self.get_order(id)?;
            let read_version = order.version();
            order.execute(&command())?;
            if read_version != pending.version() {
                return Err(FulfillmentError::InvalidState(format!(
                    "order {id} changed while stock was being reserved"
                )));
            }
            let movements = ids
                .iter()
                .map(|movement_id| self.movements.stage_completion(*movement_id))
                .collect::<FulfillmentResult<Vec<_>>>()?;
            let write = Versioned::new(order.clone(), ExpectedVersion::Exact(pending.version()));
            confirmed = Some(StatusChange {
                order,
                from: pending.status(),
            });
            Ok((movements, vec![write]))
        });

        match (committed, confirmed) {
            (Ok(_), Some(change)) => {
                info!(
                    order_number = %number,
                    items = change.order.items().len(),
                    "order confirmed, stock reserved"
                );
                Ok(change)
            }
            (Ok(_), None) => Err(FulfillmentError::InvariantViolation(format!(
                "order {id} reservation committed without a confirmation"
            ))),
            (Err(e), _) => {
                warn!(order_number = %number, error = %e, "reservation rejected, order stays pending");
                self.movements
                    .cancel_batch(&ids, actor, "order confirmation failed");
                Err(e)
            }
        }
    }

    /// Confirmed → Processing.
    #[instrument(skip(self), fields(order_id = %id), err)]
    pub fn mark_processing(&self, id: OrderId, deadline: Deadline) -> FulfillmentResult<StatusChange> {
        self.transition(id, deadline, "order.mark_processing", || {
            OrderCommand::StartProcessing(StartProcessing {
                order_id: id,
                occurred_at: Utc::now(),
            })
        })
    }

    /// Confirmed/Processing → Shipped.
    #[instrument(skip(self, note), fields(order_id = %id), err)]
    pub fn ship(
        &self,
        id: OrderId,
        tracking_number: &str,
        note: Option<String>,
        deadline: Deadline,
    ) -> FulfillmentResult<StatusChange> {
        self.transition(id, deadline, "order.ship", || {
            OrderCommand::ShipOrder(ShipOrder {
                order_id: id,
                tracking_number: tracking_number.to_string(),
                note: note.clone(),
                occurred_at: Utc::now(),
            })
        })
    }

    /// Shipped → Delivered.
    #[instrument(skip(self, note), fields(order_id = %id), err)]
    pub fn deliver(
        &self,
        id: OrderId,
        note: Option<String>,
        deadline: Deadline,
    ) -> FulfillmentResult<StatusChange> {
        self.transition(id, deadline, "order.deliver", || {
            OrderCommand::DeliverOrder(DeliverOrder {
                order_id: id,
                note: note.clone(),
                occurred_at: Utc::now(),
            })
        })
    }

    /// Pending/Confirmed → Cancelled.
    ///
    /// Every Outbound movement a confirmed order completed gets one Return
    /// movement, applied as one batch. The cancellation stands even when that
    /// batch fails: the failure is reported in [`Cancellation::restock`] and
    /// the Return movements stay Approved, carrying the order number as
    /// reference, for later completion.
    #[instrument(skip(self, reason), fields(order_id = %id), err)]
    pub fn cancel(
        &self,
        id: OrderId,
        reason: &str,
        actor: UserId,
        deadline: Deadline,
    ) -> FulfillmentResult<Cancellation> {
        let change = self.transition(id, deadline, "order.cancel", || {
            OrderCommand::CancelOrder(CancelOrder {
                order_id: id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            })
        })?;

        let restock = if change.from.holds_reservation() {
            self.restock(&change.order, actor, deadline)
        } else {
            Ok(())
        };
        Ok(Cancellation { change, restock })
    }

    /// Delivered → Returned. Returned goods are not put back into stock here.
    #[instrument(skip(self, reason), fields(order_id = %id), err)]
    pub fn return_order(
        &self,
        id: OrderId,
        reason: &str,
        deadline: Deadline,
    ) -> FulfillmentResult<StatusChange> {
        self.transition(id, deadline, "order.return", || {
            OrderCommand::ReturnOrder(ReturnOrder {
                order_id: id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            })
        })
    }

    /// Returned → Refunded.
    #[instrument(skip(self), fields(order_id = %id), err)]
    pub fn refund_order(&self, id: OrderId, deadline: Deadline) -> FulfillmentResult<StatusChange> {
        self.transition(id, deadline, "order.refund", || {
            OrderCommand::RefundOrder(RefundOrder {
                order_id: id,
                occurred_at: Utc::now(),
            })
        })
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    pub fn update_payment_status(
        &self,
        id: OrderId,
        payment_status: PaymentStatus,
        deadline: Deadline,
    ) -> FulfillmentResult<Order> {
        let change = self.mutate(id, deadline, "order.update_payment_status", || {
            OrderCommand::UpdatePaymentStatus(UpdatePaymentStatus {
                order_id: id,
                payment_status,
                occurred_at: Utc::now(),
            })
        })?;
        Ok(change.order)
    }

    /// Put back what the order's completed Outbound movements took.
    fn restock(&self, order: &Order, actor: UserId, deadline: Deadline) -> FulfillmentResult<()> {
        let number = order_number(order)?;

        let reserved = self.completed_outbound(number)?;
        if reserved.is_empty() {
            warn!(order_number = %number, "cancelled order had no completed reservations");
            return Ok(());
        }

        let requests = reserved
            .iter()
            .map(|m| {
                NewMovement::new(m.key(), MovementType::Return, m.quantity())
                    .with_reference(number.as_str(), ORDER_REFERENCE_TYPE)
            })
            .collect();
        let staged = self.movements.stage_batch(requests, actor, deadline)?;
        let ids: Vec<MovementId> = staged.iter().map(InventoryMovement::id_typed).collect();

        if let Err(e) = self.movements.complete_batch(&ids, deadline) {
            warn!(
                order_number = %number,
                error = %e,
                pending_returns = ids.len(),
                "restock failed, return movements left approved"
            );
            return Err(e);
        }

        info!(order_number = %number, returns = ids.len(), "stock restored");
        Ok(())
    }

    fn completed_outbound(&self, number: &OrderNumber) -> FulfillmentResult<Vec<InventoryMovement>> {
        let filter = MovementFilter {
            movement_type: Some(MovementType::Outbound),
            status: Some(MovementStatus::Completed),
            ..MovementFilter::for_reference(number.as_str())
        };

        let mut found = Vec::new();
        let mut pagination = Pagination::new(None, Some(Pagination::MAX_LIMIT));
        loop {
            let page = self.movements.list(&filter, pagination)?;
            let more = page.has_more(pagination);
            found.extend(page.items);
            if !more {
                return Ok(found);
            }
            pagination.offset += pagination.limit;
        }
    }

    /// Status transition with logging.
    fn transition<F>(
        &self,
        id: OrderId,
        deadline: Deadline,
        operation: &str,
        command: F,
    ) -> FulfillmentResult<StatusChange>
    where
        F: Fn() -> OrderCommand,
    {
        let change = self.mutate(id, deadline, operation, command)?;
        info!(
            order_id = %id,
            from = change.from.as_str(),
            to = change.to().as_str(),
            "order status changed"
        );
        Ok(change)
    }

    /// Load, decide, apply, compare-and-set; repeated on stale writes.
    fn mutate<F>(
        &self,
        id: OrderId,
        deadline: Deadline,
        operation: &str,
        command: F,
    ) -> FulfillmentResult<StatusChange>
    where
        F: Fn() -> OrderCommand,
    {
        retry_on_conflict(&self.retry, deadline, operation, || {
            let mut order = self.get_order(id)?;
            let from = order.status();
            let expected = ExpectedVersion::Exact(order.version());
            let events = order.execute(&command())?;
            self.store.save_order(&order, expected)?;
            for event in &events {
                debug!(
                    order_id = %id,
                    event = event.event_type(),
                    version = order.version(),
                    "order event stored"
                );
            }
            Ok(StatusChange { order, from })
        })
    }
}

fn item_key(item: &OrderItem) -> StockKey {
    StockKey {
        product_id: item.product_id,
        variant_id: item.variant_id,
    }
}

fn order_number(order: &Order) -> FulfillmentResult<&OrderNumber> {
    order.order_number().ok_or_else(|| {
        FulfillmentError::InvariantViolation(format!("order {} has no number", order.id_typed()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use storekeep_orders::SequentialOrderNumbers;
    use storekeep_products::{PricingMetadata, Product, ProductId, ProductStatus};

    type Controller = OrderController<Arc<InMemoryStore>, SequentialOrderNumbers, InMemoryCatalog>;

    fn customer() -> CustomerInfo {
        CustomerInfo {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "+44 20 7946 0000".to_string(),
        }
    }

    fn address() -> Address {
        Address {
            line1: "12 Analytical Row".to_string(),
            line2: None,
            city: "London".to_string(),
            region: None,
            postal_code: "N1 9GU".to_string(),
            country: "GB".to_string(),
        }
    }

    fn setup() -> (Controller, ProductId) {
        let catalog = InMemoryCatalog::new();
        let product = Product::new(
            ProductId::generate(),
            "MUG-01",
            "Mug",
            ProductStatus::Active,
            PricingMetadata {
                base_price: 1_000,
                currency: "USD".to_string(),
            },
        )
        .unwrap();
        let product_id = product.id_typed();
        catalog.add_product(product).unwrap();

        let config = FulfillmentConfig {
            retry: RetryPolicy::immediate(),
            ..FulfillmentConfig::default()
        };
        let controller = OrderController::new(
            Arc::new(InMemoryStore::new()),
            SequentialOrderNumbers::starting_at(1),
            catalog,
            &config,
        );
        (controller, product_id)
    }

    fn new_order(product_id: ProductId, quantity: i64) -> NewOrder {
        NewOrder {
            customer: customer(),
            shipping_address: address(),
            billing_address: None,
            lines: vec![LineRequest::product(product_id, quantity)],
            shipping_cost: 500,
            discount_amount: 0,
            notes: None,
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn create_computes_totals_and_numbers() {
        let (c, product_id) = setup();
        let order = c.create(new_order(product_id, 2)).unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        let totals = order.totals();
        assert_eq!(totals.sub_total, 2_000);
        assert_eq!(totals.tax_amount, 200);
        assert_eq!(totals.total_amount, 2_700);

        let number = order.order_number().unwrap().clone();
        assert!(number.as_str().ends_with("-000001"));
        assert_eq!(c.get_order_by_number(&number).unwrap(), order);
    }

    #[test]
    fn unknown_product_is_rejected_without_side_effects() {
        let (c, _) = setup();
        let err = c.create(new_order(ProductId::generate(), 1)).unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
        assert_eq!(
            c.list_orders(&OrderFilter::default(), Pagination::default())
                .unwrap()
                .total,
            0
        );
    }

    #[test]
    fn missing_customer_email_is_a_validation_error() {
        let (c, product_id) = setup();
        let mut request = new_order(product_id, 1);
        request.customer.email = String::new();
        assert!(matches!(
            c.create(request),
            Err(FulfillmentError::Validation(_))
        ));
    }

    #[test]
    fn items_can_change_only_while_pending() {
        let (c, product_id) = setup();
        let order = c.create(new_order(product_id, 1)).unwrap();
        let id = order.id_typed();

        let order = c
            .add_item(id, LineRequest::product(product_id, 3), Deadline::none())
            .unwrap();
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.totals().sub_total, 4_000);

        let order = c.remove_item(id, 1, Deadline::none()).unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.totals().sub_total, 3_000);

        c.cancel(id, "changed mind", UserId::new(), Deadline::none())
            .unwrap();
        assert!(matches!(
            c.add_item(id, LineRequest::product(product_id, 1), Deadline::none()),
            Err(FulfillmentError::InvalidState(_))
        ));
    }

    #[test]
    fn update_recomputes_totals() {
        let (c, product_id) = setup();
        let order = c.create(new_order(product_id, 1)).unwrap();

        let updated = c
            .update_order(
                order.id_typed(),
                UpdateOrder {
                    shipping_cost: Some(0),
                    discount_amount: Some(100),
                    notes: Some("leave at door".to_string()),
                    ..UpdateOrder::default()
                },
                Deadline::none(),
            )
            .unwrap();
        assert_eq!(updated.totals().total_amount, 1_000);
        assert_eq!(updated.notes(), Some("leave at door"));
    }

    #[test]
    fn colliding_numbers_are_redrawn() {
        struct Fixed(OrderNumber);
        impl OrderNumberGenerator for Fixed {
            fn next_number(&self, _: chrono::NaiveDate) -> OrderNumber {
                self.0.clone()
            }
        }

        let (seq, product_id) = setup();
        let first = seq.create(new_order(product_id, 1)).unwrap();
        let taken = first.order_number().unwrap().clone();

        let config = FulfillmentConfig {
            retry: RetryPolicy::immediate(),
            order_number_attempts: 3,
            ..FulfillmentConfig::default()
        };
        let fixed = OrderController::new(seq.store.clone(), Fixed(taken), seq.catalog, &config);
        let err = fixed.create(new_order(product_id, 1)).unwrap_err();
        assert!(matches!(err, FulfillmentError::Conflict(_)));
    }

    #[test]
    fn payment_status_is_independent_of_order_status() {
        let (c, product_id) = setup();
        let order = c.create(new_order(product_id, 1)).unwrap();
        let order = c
            .update_payment_status(order.id_typed(), PaymentStatus::Paid, Deadline::none())
            .unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert_eq!(order.status(), OrderStatus::Pending);
    }
}
