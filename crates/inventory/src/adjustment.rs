use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storekeep_core::{DomainError, DomainResult, Entity, UserId, aggregate_id};

use crate::stock::{StockKey, StockLevel};

aggregate_id!(
    /// Inventory adjustment identifier.
    AdjustmentId
);

/// Request to record a count-based correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAdjustment {
    pub adjustment_id: AdjustmentId,
    pub new_quantity: i64,
    pub reason: String,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// A point correction of on-hand stock.
///
/// Applied immediately (no Pending/Approved staging). `quantity_diff` is kept
/// for audit; the ledger only uses `quantity_after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    id: AdjustmentId,
    key: StockKey,
    quantity_before: i64,
    quantity_after: i64,
    quantity_diff: i64,
    reason: String,
    notes: Option<String>,
    created_by: UserId,
    created_at: DateTime<Utc>,
}

impl InventoryAdjustment {
    /// Decide an adjustment against the level as currently stored.
    pub fn record(current: &StockLevel, cmd: &RecordAdjustment) -> DomainResult<Self> {
        if cmd.new_quantity < 0 {
            return Err(DomainError::validation("adjusted quantity cannot be negative"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason cannot be empty"));
        }

        let before = current.available_quantity();
        Ok(Self {
            id: cmd.adjustment_id,
            key: current.key(),
            quantity_before: before,
            quantity_after: cmd.new_quantity,
            quantity_diff: cmd.new_quantity - before,
            reason: cmd.reason.clone(),
            notes: cmd.notes.clone(),
            created_by: cmd.created_by,
            created_at: cmd.occurred_at,
        })
    }

    pub fn id_typed(&self) -> AdjustmentId {
        self.id
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn quantity_before(&self) -> i64 {
        self.quantity_before
    }

    pub fn quantity_after(&self) -> i64 {
        self.quantity_after
    }

    pub fn quantity_diff(&self) -> i64 {
        self.quantity_diff
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for InventoryAdjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementType;
    use storekeep_products::ProductId;

    fn level(available: i64) -> StockLevel {
        let mut level = StockLevel::empty(StockKey::product(ProductId::generate()));
        level
            .apply_movement(MovementType::Inbound, available, Utc::now())
            .unwrap();
        level
    }

    fn cmd(new_quantity: i64, reason: &str) -> RecordAdjustment {
        RecordAdjustment {
            adjustment_id: AdjustmentId::generate(),
            new_quantity,
            reason: reason.to_string(),
            notes: None,
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn diff_is_after_minus_before() {
        let mut current = level(5);
        let adj = InventoryAdjustment::record(&current, &cmd(8, "cycle count")).unwrap();
        assert_eq!(adj.quantity_before(), 5);
        assert_eq!(adj.quantity_after(), 8);
        assert_eq!(adj.quantity_diff(), 3);

        current.apply_adjustment(&adj).unwrap();
        assert_eq!(current.available_quantity(), 8);
        assert_eq!(current.total_quantity(), 8);
    }

    #[test]
    fn downward_adjustment_has_negative_diff() {
        let current = level(5);
        let adj = InventoryAdjustment::record(&current, &cmd(1, "damaged")).unwrap();
        assert_eq!(adj.quantity_diff(), -4);
    }

    #[test]
    fn negative_target_and_blank_reason_are_rejected() {
        let current = level(5);
        assert!(matches!(
            InventoryAdjustment::record(&current, &cmd(-1, "count")),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            InventoryAdjustment::record(&current, &cmd(3, " ")),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn adjustment_for_other_key_is_refused_by_level() {
        let a = level(5);
        let mut b = level(5);
        let adj = InventoryAdjustment::record(&a, &cmd(1, "count")).unwrap();
        assert!(matches!(
            b.apply_adjustment(&adj),
            Err(DomainError::InvariantViolation(_))
        ));
    }
}
