//! Orders domain module.
//!
//! The order aggregate and its lifecycle, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage). Stock reservation is driven by the
//! infrastructure layer around the Confirm and Cancel transitions.

pub mod number;
pub mod order;
pub mod totals;

pub use number::{OrderNumber, OrderNumberGenerator, RandomOrderNumbers, SequentialOrderNumbers};
pub use order::{
    AddItem, Address, CancelOrder, ConfirmOrder, CustomerInfo, DeliverOrder, NewOrderLine, Order,
    OrderCommand, OrderEvent, OrderId, OrderItem, OrderStatus, PaymentStatus, PlaceOrder,
    RefundOrder, RemoveItem, ReturnOrder, ShipOrder, ShippingHistoryEntry,
    ShippingStatus, StartProcessing, UpdateOrder, UpdatePaymentStatus,
};
pub use totals::{OrderTotals, TaxRate};
