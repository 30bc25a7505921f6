use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storekeep_core::{
    Aggregate, AggregateRoot, DomainError, Entity, Metadata, aggregate_id,
};
use storekeep_events::Event;
use storekeep_products::{LineSnapshot, ProductId, VariantId};

use crate::number::OrderNumber;
use crate::totals::{OrderTotals, TaxRate};

aggregate_id!(
    /// Order identifier.
    OrderId
);

/// Order lifecycle.
///
/// ```text
/// Pending → Confirmed → Processing → Shipped → Delivered → Returned → Refunded
/// Pending | Confirmed → Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Returned,
        OrderStatus::Refunded,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub const fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub const fn is_shippable(self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Processing)
    }

    pub const fn is_deliverable(self) -> bool {
        matches!(self, OrderStatus::Shipped)
    }

    /// General field edits are refused once the order is closed.
    pub const fn is_editable(self) -> bool {
        !matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::Returned
                | OrderStatus::Refunded
        )
    }

    /// Whether stock for this order is currently held by completed Outbound movements.
    pub const fn holds_reservation(self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Processing)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    Pending,
    Processing,
    InTransit,
    Delivered,
    Returned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl CustomerInfo {
    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("customer name is required"));
        }
        if self.email.trim().is_empty() {
            return Err(DomainError::validation("customer email is required"));
        }
        if !self.email.contains('@') {
            return Err(DomainError::validation("customer email is malformed"));
        }
        if self.phone.trim().is_empty() {
            return Err(DomainError::validation("customer phone is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    fn validate(&self, which: &str) -> Result<(), DomainError> {
        let required = [
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!("{which} {field} is required")));
            }
        }
        Ok(())
    }
}

/// A line to add: catalog snapshot plus quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub snapshot: LineSnapshot,
    pub quantity: i64,
}

/// Order line with product data frozen at the time of ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub sku: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_total: i64,
}

impl OrderItem {
    fn from_line(line_no: u32, line: &NewOrderLine) -> Result<Self, DomainError> {
        if line.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if line.snapshot.unit_price < 0 {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }
        let line_total = line
            .quantity
            .checked_mul(line.snapshot.unit_price)
            .ok_or_else(|| DomainError::validation("line total overflow"))?;
        Ok(Self {
            line_no,
            product_id: line.snapshot.product_id,
            variant_id: line.snapshot.variant_id,
            product_name: line.snapshot.product_name.clone(),
            sku: line.snapshot.sku.clone(),
            quantity: line.quantity,
            unit_price: line.snapshot.unit_price,
            line_total,
        })
    }
}

impl Entity for OrderItem {
    type Id = u32;

    fn id(&self) -> &Self::Id {
        &self.line_no
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingHistoryEntry {
    pub status: ShippingStatus,
    pub note: Option<String>,
    pub tracking_number: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: Option<OrderNumber>,
    customer: Option<CustomerInfo>,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    shipping_status: ShippingStatus,
    items: Vec<OrderItem>,
    totals: OrderTotals,
    tax_rate: TaxRate,
    notes: Option<String>,
    metadata: Metadata,
    tracking_number: Option<String>,
    cancel_reason: Option<String>,
    return_reason: Option<String>,
    shipping_history: Vec<ShippingHistoryEntry>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            order_number: None,
            customer: None,
            shipping_address: None,
            billing_address: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            shipping_status: ShippingStatus::Pending,
            items: Vec::new(),
            totals: OrderTotals::default(),
            tax_rate: TaxRate::DEFAULT,
            notes: None,
            metadata: Metadata::default(),
            tracking_number: None,
            cancel_reason: None,
            return_reason: None,
            shipping_history: Vec::new(),
            created_at: None,
            updated_at: None,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> Option<&OrderNumber> {
        self.order_number.as_ref()
    }

    pub fn customer(&self) -> Option<&CustomerInfo> {
        self.customer.as_ref()
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn shipping_status(&self) -> ShippingStatus {
        self.shipping_status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
    }

    pub fn tax_rate(&self) -> TaxRate {
        self.tax_rate
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn return_reason(&self) -> Option<&str> {
        self.return_reason.as_deref()
    }

    pub fn shipping_history(&self) -> &[ShippingHistoryEntry] {
        &self.shipping_history
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder (from a cart snapshot, or with no lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub customer: CustomerInfo,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub lines: Vec<NewOrderLine>,
    pub shipping_cost: i64,
    pub discount_amount: i64,
    pub tax_rate: TaxRate,
    pub notes: Option<String>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub order_id: OrderId,
    pub line: NewOrderLine,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub order_id: OrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateOrder. `None` leaves a field as is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateOrder {
    pub customer: Option<CustomerInfo>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub notes: Option<String>,
    pub shipping_cost: Option<i64>,
    pub discount_amount: Option<i64>,
    pub metadata: Option<Metadata>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartProcessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProcessing {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: OrderId,
    pub tracking_number: String,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeliverOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverOrder {
    pub order_id: OrderId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOrder {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePaymentStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePaymentStatus {
    pub order_id: OrderId,
    pub payment_status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AddItem(AddItem),
    RemoveItem(RemoveItem),
    UpdateOrder {
        order_id: OrderId,
        changes: UpdateOrder,
        occurred_at: DateTime<Utc>,
    },
    ConfirmOrder(ConfirmOrder),
    StartProcessing(StartProcessing),
    ShipOrder(ShipOrder),
    DeliverOrder(DeliverOrder),
    CancelOrder(CancelOrder),
    ReturnOrder(ReturnOrder),
    RefundOrder(RefundOrder),
    UpdatePaymentStatus(UpdatePaymentStatus),
}

/// Events emitted by the order aggregate.
///
/// Every event carries the order id and business time; amounts are decided in
/// `handle` so `apply` never recomputes anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderPlaced {
        order_id: OrderId,
        order_number: OrderNumber,
        customer: CustomerInfo,
        shipping_address: Address,
        billing_address: Option<Address>,
        items: Vec<OrderItem>,
        totals: OrderTotals,
        tax_rate: TaxRate,
        notes: Option<String>,
        metadata: Metadata,
        occurred_at: DateTime<Utc>,
    },
    ItemAdded {
        order_id: OrderId,
        item: OrderItem,
        totals: OrderTotals,
        occurred_at: DateTime<Utc>,
    },
    ItemRemoved {
        order_id: OrderId,
        line_no: u32,
        totals: OrderTotals,
        occurred_at: DateTime<Utc>,
    },
    OrderUpdated {
        order_id: OrderId,
        customer: CustomerInfo,
        shipping_address: Address,
        billing_address: Option<Address>,
        notes: Option<String>,
        metadata: Metadata,
        totals: OrderTotals,
        occurred_at: DateTime<Utc>,
    },
    OrderConfirmed {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    ProcessingStarted {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    OrderShipped {
        order_id: OrderId,
        tracking_number: String,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    OrderDelivered {
        order_id: OrderId,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    OrderCancelled {
        order_id: OrderId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    OrderReturned {
        order_id: OrderId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    OrderRefunded {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    PaymentStatusUpdated {
        order_id: OrderId,
        payment_status: PaymentStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced { .. } => "order.placed",
            OrderEvent::ItemAdded { .. } => "order.item_added",
            OrderEvent::ItemRemoved { .. } => "order.item_removed",
            OrderEvent::OrderUpdated { .. } => "order.updated",
            OrderEvent::OrderConfirmed { .. } => "order.confirmed",
            OrderEvent::ProcessingStarted { .. } => "order.processing_started",
            OrderEvent::OrderShipped { .. } => "order.shipped",
            OrderEvent::OrderDelivered { .. } => "order.delivered",
            OrderEvent::OrderCancelled { .. } => "order.cancelled",
            OrderEvent::OrderReturned { .. } => "order.returned",
            OrderEvent::OrderRefunded { .. } => "order.refunded",
            OrderEvent::PaymentStatusUpdated { .. } => "order.payment_status_updated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced { occurred_at, .. }
            | OrderEvent::ItemAdded { occurred_at, .. }
            | OrderEvent::ItemRemoved { occurred_at, .. }
            | OrderEvent::OrderUpdated { occurred_at, .. }
            | OrderEvent::OrderConfirmed { occurred_at, .. }
            | OrderEvent::ProcessingStarted { occurred_at, .. }
            | OrderEvent::OrderShipped { occurred_at, .. }
            | OrderEvent::OrderDelivered { occurred_at, .. }
            | OrderEvent::OrderCancelled { occurred_at, .. }
            | OrderEvent::OrderReturned { occurred_at, .. }
            | OrderEvent::OrderRefunded { occurred_at, .. }
            | OrderEvent::PaymentStatusUpdated { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced {
                order_id,
                order_number,
                customer,
                shipping_address,
                billing_address,
                items,
                totals,
                tax_rate,
                notes,
                metadata,
                occurred_at,
            } => {
                self.id = *order_id;
                self.order_number = Some(order_number.clone());
                self.customer = Some(customer.clone());
                self.shipping_address = Some(shipping_address.clone());
                self.billing_address = billing_address.clone();
                self.status = OrderStatus::Pending;
                self.payment_status = PaymentStatus::Pending;
                self.shipping_status = ShippingStatus::Pending;
                self.items = items.clone();
                self.totals = *totals;
                self.tax_rate = *tax_rate;
                self.notes = notes.clone();
                self.metadata = metadata.clone();
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            OrderEvent::ItemAdded { item, totals, .. } => {
                self.items.push(item.clone());
                self.totals = *totals;
            }
            OrderEvent::ItemRemoved {
                line_no, totals, ..
            } => {
                self.items.retain(|i| i.line_no != *line_no);
                self.totals = *totals;
            }
            OrderEvent::OrderUpdated {
                customer,
                shipping_address,
                billing_address,
                notes,
                metadata,
                totals,
                ..
            } => {
                self.customer = Some(customer.clone());
                self.shipping_address = Some(shipping_address.clone());
                self.billing_address = billing_address.clone();
                self.notes = notes.clone();
                self.metadata = metadata.clone();
                self.totals = *totals;
            }
            OrderEvent::OrderConfirmed { occurred_at, .. } => {
                self.status = OrderStatus::Confirmed;
                self.confirmed_at = Some(*occurred_at);
            }
            OrderEvent::ProcessingStarted { occurred_at, .. } => {
                self.status = OrderStatus::Processing;
                self.record_shipping(ShippingStatus::Processing, None, *occurred_at);
            }
            OrderEvent::OrderShipped {
                tracking_number,
                note,
                occurred_at,
                ..
            } => {
                self.status = OrderStatus::Shipped;
                self.tracking_number = Some(tracking_number.clone());
                self.shipped_at = Some(*occurred_at);
                self.record_shipping(ShippingStatus::InTransit, note.clone(), *occurred_at);
            }
            OrderEvent::OrderDelivered {
                note, occurred_at, ..
            } => {
                self.status = OrderStatus::Delivered;
                self.delivered_at = Some(*occurred_at);
                self.record_shipping(ShippingStatus::Delivered, note.clone(), *occurred_at);
            }
            OrderEvent::OrderCancelled {
                reason,
                occurred_at,
                ..
            } => {
                self.status = OrderStatus::Cancelled;
                self.cancel_reason = Some(reason.clone());
                self.cancelled_at = Some(*occurred_at);
            }
            OrderEvent::OrderReturned {
                reason,
                occurred_at,
                ..
            } => {
                self.status = OrderStatus::Returned;
                self.return_reason = Some(reason.clone());
                self.record_shipping(
                    ShippingStatus::Returned,
                    Some(reason.clone()),
                    *occurred_at,
                );
            }
            OrderEvent::OrderRefunded { .. } => {
                self.status = OrderStatus::Refunded;
                self.payment_status = PaymentStatus::Refunded;
            }
            OrderEvent::PaymentStatusUpdated { payment_status, .. } => {
                self.payment_status = *payment_status;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            OrderCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            OrderCommand::UpdateOrder {
                order_id,
                changes,
                occurred_at,
            } => self.handle_update(*order_id, changes, *occurred_at),
            OrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            OrderCommand::StartProcessing(cmd) => self.handle_start_processing(cmd),
            OrderCommand::ShipOrder(cmd) => self.handle_ship(cmd),
            OrderCommand::DeliverOrder(cmd) => self.handle_deliver(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::ReturnOrder(cmd) => self.handle_return(cmd),
            OrderCommand::RefundOrder(cmd) => self.handle_refund(cmd),
            OrderCommand::UpdatePaymentStatus(cmd) => self.handle_payment_status(cmd),
        }
    }
}

impl Order {
    fn record_shipping(
        &mut self,
        status: ShippingStatus,
        note: Option<String>,
        recorded_at: DateTime<Utc>,
    ) {
        self.shipping_status = status;
        self.shipping_history.push(ShippingHistoryEntry {
            status,
            note,
            tracking_number: self.tracking_number.clone(),
            recorded_at,
        });
    }

    fn ensure_order(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn illegal(&self, action: &str) -> DomainError {
        DomainError::invalid_state(format!(
            "cannot {action} order {} in status {}",
            self.order_number
                .as_ref()
                .map(OrderNumber::as_str)
                .unwrap_or("<unplaced>"),
            self.status
        ))
    }

    fn next_line_no(&self) -> u32 {
        self.items.iter().map(|i| i.line_no).max().unwrap_or(0) + 1
    }

    fn compute_totals<'a>(
        &self,
        items: impl IntoIterator<Item = &'a OrderItem>,
        shipping_cost: i64,
        discount_amount: i64,
    ) -> Result<OrderTotals, DomainError> {
        OrderTotals::compute(
            items.into_iter().map(|i| i.line_total),
            shipping_cost,
            discount_amount,
            self.tax_rate,
        )
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        cmd.customer.validate()?;
        cmd.shipping_address.validate("shipping address")?;
        if let Some(billing) = &cmd.billing_address {
            billing.validate("billing address")?;
        }

        let items = cmd
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| OrderItem::from_line(idx as u32 + 1, line))
            .collect::<Result<Vec<_>, _>>()?;

        let totals = OrderTotals::compute(
            items.iter().map(|i| i.line_total),
            cmd.shipping_cost,
            cmd.discount_amount,
            cmd.tax_rate,
        )?;
        if !items.is_empty() && totals.total_amount <= 0 {
            return Err(DomainError::validation("order total must be positive"));
        }

        Ok(vec![OrderEvent::OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            customer: cmd.customer.clone(),
            shipping_address: cmd.shipping_address.clone(),
            billing_address: cmd.billing_address.clone(),
            items,
            totals,
            tax_rate: cmd.tax_rate,
            notes: cmd.notes.clone(),
            metadata: cmd.metadata.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if self.status != OrderStatus::Pending {
            return Err(self.illegal("add items to"));
        }

        let item = OrderItem::from_line(self.next_line_no(), &cmd.line)?;
        let totals = self.compute_totals(
            self.items.iter().chain(core::iter::once(&item)),
            self.totals.shipping_cost,
            self.totals.discount_amount,
        )?;

        Ok(vec![OrderEvent::ItemAdded {
            order_id: cmd.order_id,
            item,
            totals,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if self.status != OrderStatus::Pending {
            return Err(self.illegal("remove items from"));
        }
        if !self.items.iter().any(|i| i.line_no == cmd.line_no) {
            return Err(DomainError::not_found());
        }

        let totals = self.compute_totals(
            self.items.iter().filter(|i| i.line_no != cmd.line_no),
            self.totals.shipping_cost,
            self.totals.discount_amount,
        )?;

        Ok(vec![OrderEvent::ItemRemoved {
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            totals,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_update(
        &self,
        order_id: OrderId,
        changes: &UpdateOrder,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(order_id)?;
        if !self.status.is_editable() {
            return Err(self.illegal("update"));
        }

        let customer = match &changes.customer {
            Some(c) => {
                c.validate()?;
                c.clone()
            }
            None => self.customer.clone().ok_or_else(|| {
                DomainError::invariant("placed order is missing customer info")
            })?,
        };
        let shipping_address = match &changes.shipping_address {
            Some(a) => {
                a.validate("shipping address")?;
                a.clone()
            }
            None => self.shipping_address.clone().ok_or_else(|| {
                DomainError::invariant("placed order is missing shipping address")
            })?,
        };
        if let Some(billing) = &changes.billing_address {
            billing.validate("billing address")?;
        }

        let totals = self.compute_totals(
            &self.items,
            changes.shipping_cost.unwrap_or(self.totals.shipping_cost),
            changes.discount_amount.unwrap_or(self.totals.discount_amount),
        )?;
        if !self.items.is_empty() && totals.total_amount <= 0 {
            return Err(DomainError::validation("order total must be positive"));
        }

        Ok(vec![OrderEvent::OrderUpdated {
            order_id,
            customer,
            shipping_address,
            billing_address: changes
                .billing_address
                .clone()
                .or_else(|| self.billing_address.clone()),
            notes: changes.notes.clone().or_else(|| self.notes.clone()),
            metadata: changes
                .metadata
                .clone()
                .unwrap_or_else(|| self.metadata.clone()),
            totals,
            occurred_at,
        }])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if self.status != OrderStatus::Pending {
            return Err(self.illegal("confirm"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("cannot confirm order without items"));
        }
        if self.totals.total_amount <= 0 {
            return Err(DomainError::validation("order total must be positive"));
        }

        Ok(vec![OrderEvent::OrderConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_start_processing(
        &self,
        cmd: &StartProcessing,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if self.status != OrderStatus::Confirmed {
            return Err(self.illegal("start processing"));
        }

        Ok(vec![OrderEvent::ProcessingStarted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_ship(&self, cmd: &ShipOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if !self.status.is_shippable() {
            return Err(self.illegal("ship"));
        }
        if cmd.tracking_number.trim().is_empty() {
            return Err(DomainError::validation("tracking number is required"));
        }

        Ok(vec![OrderEvent::OrderShipped {
            order_id: cmd.order_id,
            tracking_number: cmd.tracking_number.clone(),
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_deliver(&self, cmd: &DeliverOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if !self.status.is_deliverable() {
            return Err(self.illegal("deliver"));
        }

        Ok(vec![OrderEvent::OrderDelivered {
            order_id: cmd.order_id,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if !self.status.is_cancellable() {
            return Err(self.illegal("cancel"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason is required"));
        }

        Ok(vec![OrderEvent::OrderCancelled {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_return(&self, cmd: &ReturnOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if self.status != OrderStatus::Delivered {
            return Err(self.illegal("return"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("return reason is required"));
        }

        Ok(vec![OrderEvent::OrderReturned {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_refund(&self, cmd: &RefundOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if self.status != OrderStatus::Returned {
            return Err(self.illegal("refund"));
        }

        Ok(vec![OrderEvent::OrderRefunded {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_payment_status(
        &self,
        cmd: &UpdatePaymentStatus,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if matches!(self.status, OrderStatus::Refunded) {
            return Err(self.illegal("change payment status of"));
        }
        if cmd.payment_status == self.payment_status {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::PaymentStatusUpdated {
            order_id: cmd.order_id,
            payment_status: cmd.payment_status,
            occurred_at: cmd.occurred_at,
        }])
    }
}
