//! Stock ledger: the only writer of stock level quantities.
//!
//! Every mutation is a read → decide → compare-and-set cycle against the
//! versioned stock level rows. A stale read surfaces as
//! `StoreError::Conflict` and the whole cycle is repeated (with backoff)
//! until the caller's deadline passes.

use tracing::{info, instrument, warn};

use storekeep_core::{Deadline, ExpectedVersion};
use storekeep_inventory::{
    InventoryAdjustment, InventoryMovement, MovementStatus, RecordAdjustment, StockKey,
    StockLevel, StockSettings,
};
use storekeep_orders::Order;

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::retry::{RetryPolicy, retry_on_conflict};
use crate::store::{LedgerCommit, StockLevelStore, Versioned};

#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> StockLedger<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: StockLevelStore> StockLedger<S> {
    /// `NotFound` until a movement has touched the key.
    pub fn get(&self, key: &StockKey) -> FulfillmentResult<StockLevel> {
        self.store
            .get_level(key)?
            .ok_or_else(|| FulfillmentError::not_found(format!("stock level for {key}")))
    }

    pub fn list(&self) -> FulfillmentResult<Vec<StockLevel>> {
        Ok(self.store.list_levels()?)
    }

    /// Levels at or below their reorder threshold (including out of stock).
    pub fn low_stock(&self) -> FulfillmentResult<Vec<StockLevel>> {
        Ok(self
            .store
            .list_levels()?
            .into_iter()
            .filter(StockLevel::needs_reorder)
            .collect())
    }

    /// Apply one completed movement; see [`StockLedger::apply_movements`].
    pub fn apply_movement<F>(&self, deadline: Deadline, mut complete: F) -> FulfillmentResult<StockLevel>
    where
        F: FnMut() -> FulfillmentResult<Versioned<InventoryMovement>>,
    {
        let levels = self.apply_movements(deadline, || Ok(vec![complete()?]))?;
        levels.into_iter().next().ok_or_else(|| {
            FulfillmentError::InvariantViolation("movement commit touched no stock level".into())
        })
    }

    /// Apply a batch of movements and store them as Completed, atomically.
    ///
    /// `complete` is called once per attempt and must re-read the movements
    /// and return them already transitioned to Completed, each paired with
    /// the version it was read at. Quantities of movements against the same
    /// key accumulate in order. Either every effect and every Completed
    /// record is committed, or nothing is.
    ///
    /// Returns the resulting stock levels, one per touched key.
    pub fn apply_movements<F>(
        &self,
        deadline: Deadline,
        mut complete: F,
    ) -> FulfillmentResult<Vec<StockLevel>>
    where
        F: FnMut() -> FulfillmentResult<Vec<Versioned<InventoryMovement>>>,
    {
        self.apply_movements_with_orders(deadline, || Ok((complete()?, Vec::new())))
    }

    /// [`StockLedger::apply_movements`] plus order records written in the
    /// same commit.
    ///
    /// `stage` returns the Completed movements and the orders whose new
    /// status stands or falls with them. A stale order version fails the
    /// attempt the same way a stale stock level does.
    #[instrument(skip(self, stage), err)]
    pub fn apply_movements_with_orders<F>(
        &self,
        deadline: Deadline,
        mut stage: F,
    ) -> FulfillmentResult<Vec<StockLevel>>
    where
        F: FnMut() -> FulfillmentResult<(Vec<Versioned<InventoryMovement>>, Vec<Versioned<Order>>)>,
    {
        let result = retry_on_conflict(&self.retry, deadline, "ledger.apply_movements", || {
            let (movements, orders) = stage()?;
            let levels = self.stage_levels(movements.iter().map(|w| &w.record))?;
            let applied: Vec<StockLevel> = levels.iter().map(|w| w.record.clone()).collect();

            self.store.commit(LedgerCommit {
                levels,
                movements,
                adjustments: Vec::new(),
                orders,
            })?;
            Ok(applied)
        });

        match &result {
            Ok(levels) => {
                for level in levels {
                    info!(
                        key = %level.key(),
                        available = level.available_quantity(),
                        version = level.version(),
                        "stock level updated"
                    );
                }
            }
            Err(e @ (FulfillmentError::InsufficientStock { .. } | FulfillmentError::Timeout(_))) => {
                warn!(error = %e, "movement batch rejected");
            }
            Err(_) => {}
        }
        result
    }

    /// Set `available_quantity` to an absolute count and record the adjustment.
    ///
    /// `NotFound` when no stock level exists for `key`.
    #[instrument(skip(self, cmd), fields(key = %key, new_quantity = cmd.new_quantity), err)]
    pub fn apply_adjustment(
        &self,
        key: StockKey,
        cmd: &RecordAdjustment,
        deadline: Deadline,
    ) -> FulfillmentResult<(InventoryAdjustment, StockLevel)> {
        let (adjustment, level) =
            retry_on_conflict(&self.retry, deadline, "ledger.apply_adjustment", || {
                let mut level = self.get(&key)?;
                let expected = ExpectedVersion::from_read(level.version());

                let adjustment = InventoryAdjustment::record(&level, cmd)?;
                level.apply_adjustment(&adjustment)?;
                level.bump_version();

                self.store.commit(LedgerCommit {
                    levels: vec![Versioned::new(level.clone(), expected)],
                    adjustments: vec![adjustment.clone()],
                    ..LedgerCommit::default()
                })?;
                Ok((adjustment, level))
            })?;

        info!(
            before = adjustment.quantity_before(),
            after = adjustment.quantity_after(),
            diff = adjustment.quantity_diff(),
            "stock adjusted"
        );
        Ok((adjustment, level))
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub fn update_settings(
        &self,
        key: StockKey,
        settings: StockSettings,
        deadline: Deadline,
    ) -> FulfillmentResult<StockLevel> {
        settings.validate()?;
        retry_on_conflict(&self.retry, deadline, "ledger.update_settings", || {
            let mut level = self.get(&key)?;
            let expected = ExpectedVersion::from_read(level.version());
            level.update_settings(settings)?;
            level.bump_version();

            self.store.commit(LedgerCommit {
                levels: vec![Versioned::new(level.clone(), expected)],
                ..LedgerCommit::default()
            })?;
            Ok(level)
        })
    }

    /// New levels for a batch of Completed movements, each paired with the
    /// version it was read at. Keys appear in first-touched order.
    fn stage_levels<'a>(
        &self,
        movements: impl IntoIterator<Item = &'a InventoryMovement>,
    ) -> FulfillmentResult<Vec<Versioned<StockLevel>>> {
        let mut staged: Vec<(StockLevel, ExpectedVersion)> = Vec::new();

        for movement in movements {
            if movement.status() != MovementStatus::Completed {
                return Err(FulfillmentError::InvariantViolation(format!(
                    "movement {} must be completed before it reaches the ledger",
                    movement.id_typed()
                )));
            }
            let completed_at = movement.completed_at().ok_or_else(|| {
                FulfillmentError::InvariantViolation(format!(
                    "movement {} has no completion time",
                    movement.id_typed()
                ))
            })?;

            let key = movement.key();
            let idx = match staged.iter().position(|(level, _)| level.key() == key) {
                Some(idx) => idx,
                None => {
                    let current = self
                        .store
                        .get_level(&key)?
                        .unwrap_or_else(|| StockLevel::empty(key));
                    let expected = ExpectedVersion::from_read(current.version());
                    staged.push((current, expected));
                    staged.len() - 1
                }
            };

            staged[idx]
                .0
                .apply_movement(movement.movement_type(), movement.quantity(), completed_at)?;
        }

        Ok(staged
            .into_iter()
            .map(|(mut level, expected)| {
                level.bump_version();
                Versioned::new(level, expected)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, MovementStore};
    use chrono::Utc;
    use storekeep_core::{Aggregate, AggregateRoot, Metadata, UserId};
    use storekeep_inventory::{
        AdjustmentId, ApproveMovement, CompleteMovement, CreateMovement, MovementCommand,
        MovementId, MovementType, StockStatus,
    };
    use storekeep_products::ProductId;

    fn ledger() -> StockLedger<InMemoryStore> {
        StockLedger::new(InMemoryStore::new(), RetryPolicy::immediate())
    }

    /// A movement driven to Completed in memory, with the version it had
    /// before completion (as if read from the store while Approved).
    fn completed(key: StockKey, movement_type: MovementType, quantity: i64) -> Versioned<InventoryMovement> {
        let id = MovementId::generate();
        let mut movement = InventoryMovement::empty(id, key);
        movement
            .execute(&MovementCommand::CreateMovement(CreateMovement {
                movement_id: id,
                key,
                movement_type,
                quantity,
                unit_cost: 0,
                reference: None,
                reference_type: None,
                notes: None,
                metadata: Metadata::default(),
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        movement
            .execute(&MovementCommand::ApproveMovement(ApproveMovement {
                movement_id: id,
                approved_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        let expected = ExpectedVersion::Any;
        movement
            .execute(&MovementCommand::CompleteMovement(CompleteMovement {
                movement_id: id,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(movement.version(), 3);
        Versioned::new(movement, expected)
    }

    fn apply(ledger: &StockLedger<InMemoryStore>, key: StockKey, t: MovementType, q: i64) -> FulfillmentResult<StockLevel> {
        let write = completed(key, t, q);
        ledger.apply_movement(Deadline::none(), || Ok(write.clone()))
    }

    #[test]
    fn first_movement_creates_the_level_lazily() {
        let ledger = ledger();
        let key = StockKey::product(ProductId::generate());
        assert!(matches!(ledger.get(&key), Err(FulfillmentError::NotFound(_))));

        let level = apply(&ledger, key, MovementType::Inbound, 10).unwrap();
        assert_eq!(level.available_quantity(), 10);
        assert_eq!(level.total_quantity(), 10);
        assert!(level.last_movement_at().is_some());
        assert_eq!(ledger.get(&key).unwrap(), level);
    }

    #[test]
    fn effects_follow_the_movement_type() {
        let ledger = ledger();
        let key = StockKey::product(ProductId::generate());
        apply(&ledger, key, MovementType::Inbound, 10).unwrap();
        assert_eq!(apply(&ledger, key, MovementType::Outbound, 4).unwrap().available_quantity(), 6);
        assert_eq!(apply(&ledger, key, MovementType::Transfer, 1).unwrap().available_quantity(), 5);
        assert_eq!(apply(&ledger, key, MovementType::Return, 2).unwrap().available_quantity(), 7);
        assert_eq!(apply(&ledger, key, MovementType::Adjustment, 3).unwrap().available_quantity(), 3);
    }

    #[test]
    fn shortfall_leaves_level_and_movement_untouched() {
        let ledger = ledger();
        let key = StockKey::product(ProductId::generate());
        apply(&ledger, key, MovementType::Inbound, 2).unwrap();

        let write = completed(key, MovementType::Outbound, 3);
        let id = write.record.id_typed();
        let err = ledger
            .apply_movement(Deadline::none(), || Ok(write.clone()))
            .unwrap_err();

        assert_eq!(
            err,
            FulfillmentError::InsufficientStock {
                target: key.to_string(),
                requested: 3,
                available: 2,
            }
        );
        assert_eq!(ledger.get(&key).unwrap().available_quantity(), 2);
        assert!(ledger.store().get_movement(id).unwrap().is_none());
    }

    #[test]
    fn same_key_movements_accumulate_within_a_batch() {
        let ledger = ledger();
        let key = StockKey::product(ProductId::generate());
        apply(&ledger, key, MovementType::Inbound, 5).unwrap();

        let batch = vec![
            completed(key, MovementType::Outbound, 3),
            completed(key, MovementType::Outbound, 3),
        ];
        let err = ledger
            .apply_movements(Deadline::none(), || Ok(batch.clone()))
            .unwrap_err();
        assert!(err.is_insufficient_stock());
        assert_eq!(ledger.get(&key).unwrap().available_quantity(), 5);

        let batch = vec![
            completed(key, MovementType::Outbound, 2),
            completed(key, MovementType::Outbound, 3),
        ];
        let levels = ledger
            .apply_movements(Deadline::none(), || Ok(batch.clone()))
            .unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].available_quantity(), 0);
    }

    #[test]
    fn movements_must_be_completed_first() {
        let ledger = ledger();
        let key = StockKey::product(ProductId::generate());
        let mut write = completed(key, MovementType::Inbound, 1);
        write.record = InventoryMovement::empty(write.record.id_typed(), key);

        let err = ledger
            .apply_movement(Deadline::none(), || Ok(write.clone()))
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvariantViolation(_)));
    }

    #[test]
    fn adjustment_requires_an_existing_level() {
        let ledger = ledger();
        let key = StockKey::product(ProductId::generate());
        let cmd = RecordAdjustment {
            adjustment_id: AdjustmentId::generate(),
            new_quantity: 8,
            reason: "cycle count".to_string(),
            notes: None,
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        };
        assert!(matches!(
            ledger.apply_adjustment(key, &cmd, Deadline::none()),
            Err(FulfillmentError::NotFound(_))
        ));

        apply(&ledger, key, MovementType::Inbound, 5).unwrap();
        let (adjustment, level) = ledger.apply_adjustment(key, &cmd, Deadline::none()).unwrap();
        assert_eq!(adjustment.quantity_diff(), 3);
        assert_eq!(level.available_quantity(), 8);
        assert_eq!(level.total_quantity(), 8);
    }

    #[test]
    fn settings_drive_low_stock_report() {
        let ledger = ledger();
        let key = StockKey::product(ProductId::generate());
        apply(&ledger, key, MovementType::Inbound, 5).unwrap();
        assert!(ledger.low_stock().unwrap().is_empty());

        let settings = StockSettings {
            min_stock_level: 2,
            max_stock_level: Some(100),
            reorder_point: Some(5),
        };
        let level = ledger.update_settings(key, settings, Deadline::none()).unwrap();
        assert_eq!(level.settings(), settings);
        assert_eq!(level.status(), StockStatus::LowStock);
        assert_eq!(ledger.low_stock().unwrap(), vec![level]);

        let bad = StockSettings {
            min_stock_level: 10,
            max_stock_level: Some(1),
            reorder_point: None,
        };
        assert!(matches!(
            ledger.update_settings(key, bad, Deadline::none()),
            Err(FulfillmentError::Validation(_))
        ));
    }
}
