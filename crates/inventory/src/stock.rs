use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storekeep_core::{DomainError, DomainResult, Entity, ValueObject};
use storekeep_products::{ProductId, VariantId};

use crate::adjustment::InventoryAdjustment;
use crate::movement::{MovementType, StockEffect};

/// Stock is tracked per product, or per variant when the product has variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl StockKey {
    pub fn product(product_id: ProductId) -> Self {
        Self {
            product_id,
            variant_id: None,
        }
    }

    pub fn variant(product_id: ProductId, variant_id: VariantId) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
        }
    }
}

impl ValueObject for StockKey {}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.variant_id {
            Some(variant_id) => write!(f, "product {} / variant {}", self.product_id, variant_id),
            None => write!(f, "product {}", self.product_id),
        }
    }
}

/// Reorder thresholds for a stock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockSettings {
    pub min_stock_level: i64,
    pub max_stock_level: Option<i64>,
    pub reorder_point: Option<i64>,
}

impl StockSettings {
    pub fn validate(&self) -> DomainResult<()> {
        if self.min_stock_level < 0 {
            return Err(DomainError::validation("min_stock_level cannot be negative"));
        }
        if let Some(max) = self.max_stock_level {
            if max < self.min_stock_level {
                return Err(DomainError::validation(
                    "max_stock_level cannot be below min_stock_level",
                ));
            }
        }
        if matches!(self.reorder_point, Some(p) if p < 0) {
            return Err(DomainError::validation("reorder_point cannot be negative"));
        }
        Ok(())
    }

    /// Level at or below which the key needs reordering.
    pub fn reorder_threshold(&self) -> i64 {
        self.reorder_point.unwrap_or(self.min_stock_level)
    }
}

impl ValueObject for StockSettings {}

/// The four quantity columns of a stock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockQuantities {
    pub available: i64,
    pub reserved: i64,
    pub incoming: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

/// Current quantity state for one [`StockKey`].
///
/// Created lazily (all zeros) the first time a movement targets the key and
/// never deleted. `total_quantity` mirrors `available_quantity` after every
/// change, so it equals the running sum of applied movement effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    key: StockKey,
    quantities: StockQuantities,
    settings: StockSettings,
    last_movement_at: Option<DateTime<Utc>>,
    version: u64,
}

impl StockLevel {
    /// A never-stored level with all quantities at zero.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            quantities: StockQuantities::default(),
            settings: StockSettings::default(),
            last_movement_at: None,
            version: 0,
        }
    }

    /// Rebuild a stored level (persistence adapters only).
    pub fn restore(
        key: StockKey,
        quantities: StockQuantities,
        settings: StockSettings,
        last_movement_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Self {
        Self {
            key,
            quantities,
            settings,
            last_movement_at,
            version,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn available_quantity(&self) -> i64 {
        self.quantities.available
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.quantities.reserved
    }

    pub fn incoming_quantity(&self) -> i64 {
        self.quantities.incoming
    }

    pub fn total_quantity(&self) -> i64 {
        self.quantities.total
    }

    pub fn quantities(&self) -> StockQuantities {
        self.quantities
    }

    pub fn settings(&self) -> StockSettings {
        self.settings
    }

    pub fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    /// Stored version; 0 when the level has never been persisted.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version the store assigns on the next successful write.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn status(&self) -> StockStatus {
        if self.quantities.available <= 0 {
            StockStatus::OutOfStock
        } else if self.quantities.available <= self.settings.reorder_threshold() {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    pub fn needs_reorder(&self) -> bool {
        self.status() != StockStatus::InStock
    }

    /// Apply a completed movement's quantity effect.
    ///
    /// Decrements that would leave `available < 0` are rejected and leave the
    /// level untouched.
    pub fn apply_movement(
        &mut self,
        movement_type: MovementType,
        quantity: i64,
        completed_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let available = self.quantities.available;
        let next = match movement_type.effect() {
            StockEffect::Increase => available
                .checked_add(quantity)
                .ok_or_else(|| DomainError::validation("stock quantity overflow"))?,
            StockEffect::Decrease => {
                let next = available
                    .checked_sub(quantity)
                    .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;
                if next < 0 {
                    return Err(DomainError::insufficient_stock(
                        self.key.to_string(),
                        quantity,
                        available,
                    ));
                }
                next
            }
            StockEffect::Set => {
                if quantity < 0 {
                    return Err(DomainError::validation("stock cannot be set below zero"));
                }
                quantity
            }
        };

        self.quantities.available = next;
        self.quantities.total = next;
        self.last_movement_at = Some(completed_at);
        Ok(())
    }

    /// Set the available quantity to an adjustment's absolute `quantity_after`.
    pub fn apply_adjustment(&mut self, adjustment: &InventoryAdjustment) -> DomainResult<()> {
        if adjustment.key() != self.key {
            return Err(DomainError::invariant("adjustment targets a different stock key"));
        }
        self.quantities.available = adjustment.quantity_after();
        self.quantities.total = adjustment.quantity_after();
        self.last_movement_at = Some(adjustment.created_at());
        Ok(())
    }

    pub fn update_settings(&mut self, settings: StockSettings) -> DomainResult<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }
}

impl Entity for StockLevel {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_with(available: i64) -> StockLevel {
        let mut level = StockLevel::empty(StockKey::product(ProductId::generate()));
        if available > 0 {
            level
                .apply_movement(MovementType::Inbound, available, Utc::now())
                .unwrap();
        }
        level
    }

    #[test]
    fn outbound_to_exactly_zero_is_allowed() {
        let mut level = level_with(10);
        level
            .apply_movement(MovementType::Outbound, 10, Utc::now())
            .unwrap();
        assert_eq!(level.available_quantity(), 0);
        assert_eq!(level.total_quantity(), 0);
        assert_eq!(level.status(), StockStatus::OutOfStock);
    }

    #[test]
    fn outbound_past_zero_is_rejected_without_change() {
        let mut level = level_with(3);
        let stamped = level.last_movement_at();

        let err = level
            .apply_movement(MovementType::Transfer, 4, Utc::now())
            .unwrap_err();

        match err {
            DomainError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(level.available_quantity(), 3);
        assert_eq!(level.last_movement_at(), stamped);
    }

    #[test]
    fn adjustment_type_movement_sets_absolute_quantity() {
        let mut level = level_with(7);
        level
            .apply_movement(MovementType::Adjustment, 2, Utc::now())
            .unwrap();
        assert_eq!(level.available_quantity(), 2);
        assert_eq!(level.total_quantity(), 2);
    }

    #[test]
    fn return_increases_available() {
        let mut level = level_with(1);
        level.apply_movement(MovementType::Return, 4, Utc::now()).unwrap();
        assert_eq!(level.available_quantity(), 5);
    }

    #[test]
    fn status_uses_reorder_point_then_min_level() {
        let mut level = level_with(5);
        assert_eq!(level.status(), StockStatus::InStock);

        level
            .update_settings(StockSettings {
                min_stock_level: 2,
                max_stock_level: Some(100),
                reorder_point: Some(5),
            })
            .unwrap();
        assert_eq!(level.status(), StockStatus::LowStock);

        level
            .update_settings(StockSettings {
                min_stock_level: 6,
                max_stock_level: None,
                reorder_point: None,
            })
            .unwrap();
        assert!(level.needs_reorder());
    }

    #[test]
    fn settings_reject_max_below_min() {
        let mut level = level_with(0);
        let err = level
            .update_settings(StockSettings {
                min_stock_level: 10,
                max_stock_level: Some(5),
                reorder_point: None,
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(level.settings(), StockSettings::default());
    }

    #[test]
    fn key_display_mentions_variant_only_when_present() {
        let product_id = ProductId::generate();
        let variant_id = VariantId::generate();
        assert!(!StockKey::product(product_id).to_string().contains("variant"));
        assert!(
            StockKey::variant(product_id, variant_id)
                .to_string()
                .contains(&variant_id.to_string())
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn movement_type() -> impl Strategy<Value = MovementType> {
            prop_oneof![
                Just(MovementType::Inbound),
                Just(MovementType::Outbound),
                Just(MovementType::Transfer),
                Just(MovementType::Return),
                Just(MovementType::Adjustment),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 512,
                ..ProptestConfig::default()
            })]

            /// Property: no accepted sequence of movements leaves available below zero,
            /// and total always equals the running result of accepted effects.
            #[test]
            fn accepted_movements_never_drive_stock_negative(
                ops in prop::collection::vec((movement_type(), 1i64..50), 1..64)
            ) {
                let mut level = StockLevel::empty(StockKey::product(ProductId::generate()));
                let mut running = 0i64;

                for (kind, qty) in ops {
                    let accepted = level.apply_movement(kind, qty, Utc::now()).is_ok();
                    if accepted {
                        running = match kind.effect() {
                            StockEffect::Increase => running + qty,
                            StockEffect::Decrease => running - qty,
                            StockEffect::Set => qty,
                        };
                    }
                    prop_assert!(level.available_quantity() >= 0);
                    prop_assert_eq!(level.total_quantity(), running);
                    prop_assert_eq!(level.available_quantity(), running);
                }
            }
        }
    }
}
