//! Count-based stock corrections.

use chrono::Utc;
use tracing::instrument;

use storekeep_core::{Deadline, UserId};
use storekeep_inventory::{AdjustmentId, InventoryAdjustment, RecordAdjustment, StockKey, StockLevel};

use crate::error::FulfillmentResult;
use crate::ledger::StockLedger;
use crate::retry::RetryPolicy;
use crate::store::{AdjustmentStore, StockLevelStore};

#[derive(Debug, Clone)]
pub struct AdjustmentRecorder<S> {
    ledger: StockLedger<S>,
}

impl<S> AdjustmentRecorder<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self {
            ledger: StockLedger::new(store, retry),
        }
    }
}

impl<S> AdjustmentRecorder<S>
where
    S: StockLevelStore + AdjustmentStore,
{
    /// Set the available quantity of `key` to `new_quantity`.
    ///
    /// The stock level must already exist (`NotFound` otherwise). The
    /// adjustment row and the new quantity are committed together.
    #[instrument(skip(self, reason, notes), fields(key = %key), err)]
    pub fn create(
        &self,
        key: StockKey,
        new_quantity: i64,
        reason: &str,
        notes: Option<String>,
        actor: UserId,
        deadline: Deadline,
    ) -> FulfillmentResult<(InventoryAdjustment, StockLevel)> {
        let cmd = RecordAdjustment {
            adjustment_id: AdjustmentId::generate(),
            new_quantity,
            reason: reason.to_string(),
            notes,
            created_by: actor,
            occurred_at: Utc::now(),
        };
        self.ledger.apply_adjustment(key, &cmd, deadline)
    }

    /// Newest first.
    pub fn history(&self, key: &StockKey) -> FulfillmentResult<Vec<InventoryAdjustment>> {
        Ok(self.ledger.store().list_adjustments(key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FulfillmentError;
    use crate::movements::{MovementController, NewMovement};
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use storekeep_inventory::MovementType;
    use storekeep_products::ProductId;

    #[test]
    fn adjustments_are_recorded_newest_first() {
        let store = Arc::new(InMemoryStore::new());
        let movements = MovementController::new(store.clone(), RetryPolicy::immediate());
        let recorder = AdjustmentRecorder::new(store, RetryPolicy::immediate());
        let key = StockKey::product(ProductId::generate());

        let m = movements
            .create(NewMovement::new(key, MovementType::Inbound, 5), UserId::new())
            .unwrap();
        movements
            .approve(m.id_typed(), UserId::new(), Deadline::none())
            .unwrap();
        movements.complete(m.id_typed(), Deadline::none()).unwrap();

        let (first, _) = recorder
            .create(key, 8, "cycle count", None, UserId::new(), Deadline::none())
            .unwrap();
        let (second, level) = recorder
            .create(
                key,
                6,
                "damaged",
                Some("two crushed boxes".to_string()),
                UserId::new(),
                Deadline::none(),
            )
            .unwrap();

        assert_eq!(first.quantity_diff(), 3);
        assert_eq!(second.quantity_before(), 8);
        assert_eq!(second.quantity_diff(), -2);
        assert_eq!(level.available_quantity(), 6);

        let history = recorder.history(&key).unwrap();
        assert_eq!(
            history.iter().map(|a| a.id_typed()).collect::<Vec<_>>(),
            vec![second.id_typed(), first.id_typed()]
        );
    }

    #[test]
    fn blank_reason_or_negative_count_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let movements = MovementController::new(store.clone(), RetryPolicy::immediate());
        let recorder = AdjustmentRecorder::new(store, RetryPolicy::immediate());
        let key = StockKey::product(ProductId::generate());
        let m = movements
            .create(NewMovement::new(key, MovementType::Inbound, 1), UserId::new())
            .unwrap();
        movements
            .approve(m.id_typed(), UserId::new(), Deadline::none())
            .unwrap();
        movements.complete(m.id_typed(), Deadline::none()).unwrap();

        for (qty, reason) in [(3, " "), (-1, "count")] {
            let err = recorder
                .create(key, qty, reason, None, UserId::new(), Deadline::none())
                .unwrap_err();
            assert!(matches!(err, FulfillmentError::Validation(_)));
        }
        assert_eq!(movements.ledger().get(&key).unwrap().available_quantity(), 1);
        assert!(recorder.history(&key).unwrap().is_empty());
    }
}
