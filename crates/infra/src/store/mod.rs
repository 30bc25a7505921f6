//! Persistence boundary for stock levels, movements, adjustments and orders.
//!
//! The services only see the traits in [`r#trait`]; `InMemoryStore` backs
//! tests and `PostgresStore` backs deployments.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{MovementFilter, OrderFilter, Page, Pagination};
pub use r#trait::{
    AdjustmentStore, FulfillmentStore, LedgerCommit, MovementStore, OrderStore, StockLevelStore,
    StoreError, Versioned,
};
