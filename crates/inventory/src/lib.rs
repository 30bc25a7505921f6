//! Inventory domain module.
//!
//! Stock levels, the movement state machine and point adjustments, implemented
//! purely as deterministic domain logic (no IO, no locking, no storage). The
//! infrastructure layer serializes writers and persists the results.

pub mod adjustment;
pub mod movement;
pub mod stock;

pub use adjustment::{AdjustmentId, InventoryAdjustment, RecordAdjustment};
pub use movement::{
    ApproveMovement, CancelMovement, CompleteMovement, CreateMovement, InventoryMovement,
    MovementApproved, MovementCancelled, MovementCommand, MovementCompleted, MovementCreated,
    MovementEvent, MovementId, MovementStatus, MovementType, MovementUpdated, StockEffect,
    UpdateMovement,
};
pub use stock::{StockKey, StockLevel, StockQuantities, StockSettings, StockStatus};
