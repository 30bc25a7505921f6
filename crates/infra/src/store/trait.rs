use std::sync::Arc;

use thiserror::Error;

use storekeep_core::ExpectedVersion;
use storekeep_inventory::{InventoryAdjustment, InventoryMovement, MovementId, StockKey, StockLevel};
use storekeep_orders::{Order, OrderId, OrderNumber};

use super::query::{MovementFilter, OrderFilter, Page, Pagination};

/// Persistence failure.
///
/// These are **infrastructure errors**, as opposed to domain errors
/// (validation, invariants, illegal transitions).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Stored version differs from the expected one, or a unique key is taken.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A record to write together with the version it was decided against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub record: T,
    pub expected: ExpectedVersion,
}

impl<T> Versioned<T> {
    pub fn new(record: T, expected: ExpectedVersion) -> Self {
        Self { record, expected }
    }
}

/// One all-or-nothing ledger write.
///
/// Carries every stock level touched by the operation plus the movement and
/// adjustment records whose state depends on those quantities, so a movement
/// can never be stored as Completed without its effect (and vice versa).
/// Orders whose status moves with the stock (a confirmation) ride along.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCommit {
    pub levels: Vec<Versioned<StockLevel>>,
    pub movements: Vec<Versioned<InventoryMovement>>,
    pub adjustments: Vec<InventoryAdjustment>,
    pub orders: Vec<Versioned<Order>>,
}

impl LedgerCommit {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
            && self.movements.is_empty()
            && self.adjustments.is_empty()
            && self.orders.is_empty()
    }
}

/// Stock level rows plus the atomic ledger commit.
///
/// Implementations must:
/// - check every `expected` version before writing anything
/// - apply the whole [`LedgerCommit`] or none of it
pub trait StockLevelStore: Send + Sync {
    fn get_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StoreError>;

    fn list_levels(&self) -> Result<Vec<StockLevel>, StoreError>;

    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError>;
}

/// Movement records outside of ledger commits (creation, edits, lifecycle
/// steps without stock effect).
pub trait MovementStore: Send + Sync {
    /// `Conflict` when the id is taken.
    fn insert_movement(&self, movement: &InventoryMovement) -> Result<(), StoreError>;

    fn get_movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError>;

    fn save_movement(
        &self,
        movement: &InventoryMovement,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    fn delete_movement(&self, id: MovementId, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Newest first.
    fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryMovement>, StoreError>;
}

pub trait AdjustmentStore: Send + Sync {
    /// Newest first.
    fn list_adjustments(&self, key: &StockKey) -> Result<Vec<InventoryAdjustment>, StoreError>;
}

/// Orders, including their items and shipping history.
pub trait OrderStore: Send + Sync {
    /// `Conflict` when the id or the order number is taken.
    fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    fn get_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    fn save_order(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Newest first.
    fn list_orders(
        &self,
        filter: &OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<Order>, StoreError>;
}

/// Everything the fulfillment services need from persistence.
pub trait FulfillmentStore: StockLevelStore + MovementStore + AdjustmentStore + OrderStore {}

impl<S> FulfillmentStore for S where S: StockLevelStore + MovementStore + AdjustmentStore + OrderStore {}

impl<S> StockLevelStore for Arc<S>
where
    S: StockLevelStore + ?Sized,
{
    fn get_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StoreError> {
        (**self).get_level(key)
    }

    fn list_levels(&self) -> Result<Vec<StockLevel>, StoreError> {
        (**self).list_levels()
    }

    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        (**self).commit(commit)
    }
}

impl<S> MovementStore for Arc<S>
where
    S: MovementStore + ?Sized,
{
    fn insert_movement(&self, movement: &InventoryMovement) -> Result<(), StoreError> {
        (**self).insert_movement(movement)
    }

    fn get_movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError> {
        (**self).get_movement(id)
    }

    fn save_movement(
        &self,
        movement: &InventoryMovement,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        (**self).save_movement(movement, expected)
    }

    fn delete_movement(&self, id: MovementId, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).delete_movement(id, expected)
    }

    fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryMovement>, StoreError> {
        (**self).list_movements(filter, pagination)
    }
}

impl<S> AdjustmentStore for Arc<S>
where
    S: AdjustmentStore + ?Sized,
{
    fn list_adjustments(&self, key: &StockKey) -> Result<Vec<InventoryAdjustment>, StoreError> {
        (**self).list_adjustments(key)
    }
}

impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        (**self).insert_order(order)
    }

    fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).get_order(id)
    }

    fn get_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        (**self).get_order_by_number(number)
    }

    fn save_order(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).save_order(order, expected)
    }

    fn list_orders(
        &self,
        filter: &OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<Order>, StoreError> {
        (**self).list_orders(filter, pagination)
    }
}
