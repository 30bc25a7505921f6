//! Infrastructure layer: stock ledger, movement and order services, storage.
//!
//! The domain crates decide; this crate loads state, runs the decision,
//! and commits the result with optimistic concurrency:
//!
//! - [`ledger::StockLedger`] applies completed movements and adjustments to
//!   stock levels in all-or-nothing batches.
//! - [`movements::MovementController`] drives the movement lifecycle.
//! - [`adjustments::AdjustmentRecorder`] records count-based corrections.
//! - [`orders::OrderController`] runs the order lifecycle and reserves or
//!   restores stock around Confirm and Cancel.
//! - [`coordinator::FulfillmentCoordinator`] fronts the order operations and
//!   notifies an [`event_sink::OrderEventSink`].
//!
//! Storage sits behind the traits in [`store`], with in-memory and Postgres
//! implementations.

pub mod adjustments;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event_sink;
pub mod ledger;
pub mod movements;
pub mod orders;
pub mod retry;
pub mod store;


pub use adjustments::AdjustmentRecorder;
pub use catalog::{Catalog, InMemoryCatalog, LineRequest};
pub use config::FulfillmentConfig;
pub use coordinator::FulfillmentCoordinator;
pub use error::{FulfillmentError, FulfillmentResult};
pub use event_sink::{BusEventSink, OrderEventSink, SinkError, TracingEventSink};
pub use ledger::StockLedger;
pub use movements::{MovementChanges, MovementController, NewMovement};
pub use orders::{Cancellation, NewOrder, OrderController, StatusChange};
pub use retry::RetryPolicy;
pub use store::{FulfillmentStore, InMemoryStore, PostgresStore, StoreError};
