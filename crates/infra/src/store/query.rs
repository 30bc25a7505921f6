//! Filters and pagination for list queries.

use serde::{Deserialize, Serialize};

use storekeep_inventory::{InventoryMovement, MovementStatus, MovementType};
use storekeep_orders::{Order, OrderStatus};
use storekeep_products::{ProductId, VariantId};

/// Offset/limit window over a newest-first listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(offset: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(50).min(Self::MAX_LIMIT),
        }
    }

    /// Cut one page out of an already ordered listing.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Page { items, total }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages.
    pub total: u64,
}

impl<T> Page<T> {
    pub fn has_more(&self, pagination: Pagination) -> bool {
        self.total > u64::from(pagination.offset) + u64::from(pagination.limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub variant_id: Option<VariantId>,
    pub movement_type: Option<MovementType>,
    pub status: Option<MovementStatus>,
    /// Exact match, e.g. an order number.
    pub reference: Option<String>,
}

impl MovementFilter {
    pub fn for_reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, movement: &InventoryMovement) -> bool {
        let key = movement.key();
        self.product_id.is_none_or(|p| key.product_id == p)
            && self.variant_id.is_none_or(|v| key.variant_id == Some(v))
            && self.movement_type.is_none_or(|t| movement.movement_type() == t)
            && self.status.is_none_or(|s| movement.status() == s)
            && self
                .reference
                .as_deref()
                .is_none_or(|r| movement.reference() == Some(r))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status() == s)
    }
}
