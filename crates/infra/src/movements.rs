//! Movement lifecycle: Pending → Approved → Completed, or → Cancelled.
//!
//! Completion goes through the [`StockLedger`] so the movement becomes
//! Completed in the same commit that applies its quantity. A rejected
//! completion (insufficient stock, timeout) leaves the movement Approved.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use storekeep_core::{Aggregate, AggregateRoot, Deadline, ExpectedVersion, Metadata, UserId};
use storekeep_inventory::{
    ApproveMovement, CancelMovement, CompleteMovement, CreateMovement, InventoryMovement,
    MovementCommand, MovementId, MovementType, StockKey, StockLevel, UpdateMovement,
};

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::ledger::StockLedger;
use crate::retry::{RetryPolicy, retry_on_conflict};
use crate::store::{MovementFilter, MovementStore, Page, Pagination, StockLevelStore, Versioned};

/// Request to record a stock change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub key: StockKey,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: i64,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    pub metadata: Metadata,
}

impl NewMovement {
    pub fn new(key: StockKey, movement_type: MovementType, quantity: i64) -> Self {
        Self {
            key,
            movement_type,
            quantity,
            unit_cost: 0,
            reference: None,
            reference_type: None,
            notes: None,
            metadata: Metadata::default(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>, reference_type: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self.reference_type = Some(reference_type.into());
        self
    }
}

/// Edits allowed while a movement is Pending. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementChanges {
    pub unit_cost: Option<i64>,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone)]
pub struct MovementController<S> {
    ledger: StockLedger<S>,
    retry: RetryPolicy,
    compensation_timeout: Duration,
}

impl<S> MovementController<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self {
            ledger: StockLedger::new(store, retry),
            retry,
            compensation_timeout: Duration::from_secs(5),
        }
    }

    /// Deadline budget for cancelling staged movements after a failure.
    pub fn with_compensation_timeout(mut self, timeout: Duration) -> Self {
        self.compensation_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &StockLedger<S> {
        &self.ledger
    }
}

impl<S> MovementController<S>
where
    S: MovementStore + StockLevelStore,
{
    fn store(&self) -> &S {
        self.ledger.store()
    }

    pub fn get(&self, id: MovementId) -> FulfillmentResult<InventoryMovement> {
        self.store()
            .get_movement(id)?
            .ok_or_else(|| FulfillmentError::not_found(format!("movement {id}")))
    }

    pub fn list(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> FulfillmentResult<Page<InventoryMovement>> {
        Ok(self.store().list_movements(filter, pagination)?)
    }

    #[instrument(
        skip(self, request),
        fields(key = %request.key, movement_type = request.movement_type.as_str(), quantity = request.quantity),
        err
    )]
    pub fn create(&self, request: NewMovement, actor: UserId) -> FulfillmentResult<InventoryMovement> {
        let id = MovementId::generate();
        let mut movement = InventoryMovement::empty(id, request.key);
        movement.execute(&MovementCommand::CreateMovement(CreateMovement {
            movement_id: id,
            key: request.key,
            movement_type: request.movement_type,
            quantity: request.quantity,
            unit_cost: request.unit_cost,
            reference: request.reference,
            reference_type: request.reference_type,
            notes: request.notes,
            metadata: request.metadata,
            created_by: actor,
            occurred_at: Utc::now(),
        }))?;

        self.store().insert_movement(&movement)?;
        info!(movement_id = %id, "movement created");
        Ok(movement)
    }

    #[instrument(skip(self, changes), fields(movement_id = %id), err)]
    pub fn update(
        &self,
        id: MovementId,
        changes: MovementChanges,
        deadline: Deadline,
    ) -> FulfillmentResult<InventoryMovement> {
        self.transition(id, deadline, "movement.update", || {
            MovementCommand::UpdateMovement(UpdateMovement {
                movement_id: id,
                unit_cost: changes.unit_cost,
                reference: changes.reference.clone(),
                reference_type: changes.reference_type.clone(),
                notes: changes.notes.clone(),
                metadata: changes.metadata.clone(),
                occurred_at: Utc::now(),
            })
        })
    }

    /// Only Pending movements can be deleted.
    #[instrument(skip(self), fields(movement_id = %id), err)]
    pub fn delete(&self, id: MovementId, deadline: Deadline) -> FulfillmentResult<()> {
        retry_on_conflict(&self.retry, deadline, "movement.delete", || {
            let movement = self.get(id)?;
            movement.ensure_deletable()?;
            self.store()
                .delete_movement(id, ExpectedVersion::Exact(movement.version()))?;
            Ok(())
        })?;
        info!("movement deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(movement_id = %id), err)]
    pub fn approve(
        &self,
        id: MovementId,
        approver: UserId,
        deadline: Deadline,
    ) -> FulfillmentResult<InventoryMovement> {
        let movement = self.transition(id, deadline, "movement.approve", || {
            MovementCommand::ApproveMovement(ApproveMovement {
                movement_id: id,
                approved_by: approver,
                occurred_at: Utc::now(),
            })
        })?;
        info!(approved_by = %approver, "movement approved");
        Ok(movement)
    }

    /// Pending or Approved → Cancelled.
    #[instrument(skip(self, reason), fields(movement_id = %id), err)]
    pub fn cancel(
        &self,
        id: MovementId,
        actor: UserId,
        reason: &str,
        deadline: Deadline,
    ) -> FulfillmentResult<InventoryMovement> {
        let movement = self.transition(id, deadline, "movement.cancel", || {
            MovementCommand::CancelMovement(CancelMovement {
                movement_id: id,
                cancelled_by: actor,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            })
        })?;
        info!(reason, "movement cancelled");
        Ok(movement)
    }

    /// Approved → Completed, applying the quantity to the stock level.
    ///
    /// Completing anything but an Approved movement is `InvalidState` and
    /// has no stock effect.
    #[instrument(skip(self), fields(movement_id = %id), err)]
    pub fn complete(
        &self,
        id: MovementId,
        deadline: Deadline,
    ) -> FulfillmentResult<(InventoryMovement, StockLevel)> {
        let mut completed = None;
        let level = self.ledger.apply_movement(deadline, || {
            let write = self.stage_completion(id)?;
            completed = Some(write.record.clone());
            Ok(write)
        })?;

        let movement = completed.ok_or_else(|| {
            FulfillmentError::InvariantViolation(format!("movement {id} was not staged"))
        })?;
        info!(available = level.available_quantity(), "movement completed");
        Ok((movement, level))
    }

    /// Create and approve one movement per request. No stock effect yet.
    ///
    /// If any request fails, the movements staged so far are cancelled.
    pub fn stage_batch(
        &self,
        requests: Vec<NewMovement>,
        actor: UserId,
        deadline: Deadline,
    ) -> FulfillmentResult<Vec<InventoryMovement>> {
        let mut ids = Vec::with_capacity(requests.len());
        let mut approved = Vec::with_capacity(requests.len());
        for request in requests {
            let result = self.create(request, actor).and_then(|created| {
                ids.push(created.id_typed());
                self.approve(created.id_typed(), actor, deadline)
            });
            match result {
                Ok(movement) => approved.push(movement),
                Err(e) => {
                    self.cancel_batch(&ids, actor, "staging failed");
                    return Err(e);
                }
            }
        }
        Ok(approved)
    }

    /// Complete Approved movements in one ledger commit (all or none).
    pub fn complete_batch(
        &self,
        ids: &[MovementId],
        deadline: Deadline,
    ) -> FulfillmentResult<Vec<StockLevel>> {
        self.ledger.apply_movements(deadline, || {
            ids.iter().map(|id| self.stage_completion(*id)).collect()
        })
    }

    /// Best-effort cancellation of staged movements; failures are logged.
    ///
    /// Runs under its own deadline so it still works after the caller's
    /// deadline has expired.
    pub fn cancel_batch(&self, ids: &[MovementId], actor: UserId, reason: &str) {
        let deadline = Deadline::within(self.compensation_timeout);
        for id in ids {
            if let Err(e) = self.cancel(*id, actor, reason, deadline) {
                warn!(movement_id = %id, error = %e, "could not cancel staged movement");
            }
        }
    }

    /// Re-read `id` and transition it to Completed in memory, paired with the
    /// version it was read at.
    pub(crate) fn stage_completion(&self, id: MovementId) -> FulfillmentResult<Versioned<InventoryMovement>> {
        let mut movement = self.get(id)?;
        let expected = ExpectedVersion::Exact(movement.version());
        movement.execute(&MovementCommand::CompleteMovement(CompleteMovement {
            movement_id: id,
            occurred_at: Utc::now(),
        }))?;
        Ok(Versioned::new(movement, expected))
    }

    fn transition<F>(
        &self,
        id: MovementId,
        deadline: Deadline,
        operation: &str,
        command: F,
    ) -> FulfillmentResult<InventoryMovement>
    where
        F: Fn() -> MovementCommand,
    {
        retry_on_conflict(&self.retry, deadline, operation, || {
            let mut movement = self.get(id)?;
            let expected = ExpectedVersion::Exact(movement.version());
            movement.execute(&command())?;
            self.store().save_movement(&movement, expected)?;
            Ok(movement)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use storekeep_inventory::MovementStatus;
    use storekeep_products::ProductId;

    fn controller() -> MovementController<Arc<InMemoryStore>> {
        MovementController::new(Arc::new(InMemoryStore::new()), RetryPolicy::immediate())
    }

    fn approved(
        c: &MovementController<Arc<InMemoryStore>>,
        key: StockKey,
        t: MovementType,
        q: i64,
    ) -> InventoryMovement {
        let m = c.create(NewMovement::new(key, t, q), UserId::new()).unwrap();
        c.approve(m.id_typed(), UserId::new(), Deadline::none()).unwrap()
    }

    #[test]
    fn pending_movement_cannot_complete() {
        let c = controller();
        let key = StockKey::product(ProductId::generate());
        let m = c
            .create(NewMovement::new(key, MovementType::Inbound, 5), UserId::new())
            .unwrap();

        let err = c.complete(m.id_typed(), Deadline::none()).unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidState(_)));
        assert!(c.ledger().get(&key).is_err());
        assert_eq!(c.get(m.id_typed()).unwrap().status(), MovementStatus::Pending);
    }

    #[test]
    fn completing_twice_does_not_double_apply() {
        let c = controller();
        let key = StockKey::product(ProductId::generate());
        let m = approved(&c, key, MovementType::Inbound, 5);

        let (done, level) = c.complete(m.id_typed(), Deadline::none()).unwrap();
        assert_eq!(done.status(), MovementStatus::Completed);
        assert!(done.completed_at().is_some());
        assert_eq!(level.available_quantity(), 5);

        let err = c.complete(m.id_typed(), Deadline::none()).unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidState(_)));
        assert_eq!(c.ledger().get(&key).unwrap().available_quantity(), 5);
    }

    #[test]
    fn edits_and_deletes_only_while_pending() {
        let c = controller();
        let key = StockKey::product(ProductId::generate());
        let m = c
            .create(NewMovement::new(key, MovementType::Inbound, 4), UserId::new())
            .unwrap();

        let edited = c
            .update(
                m.id_typed(),
                MovementChanges {
                    unit_cost: Some(150),
                    notes: Some("recount".to_string()),
                    ..MovementChanges::default()
                },
                Deadline::none(),
            )
            .unwrap();
        assert_eq!(edited.total_cost(), 600);
        assert_eq!(edited.quantity(), 4);

        c.approve(m.id_typed(), UserId::new(), Deadline::none()).unwrap();
        assert!(matches!(
            c.update(m.id_typed(), MovementChanges::default(), Deadline::none()),
            Err(FulfillmentError::InvalidState(_))
        ));
        assert!(matches!(
            c.delete(m.id_typed(), Deadline::none()),
            Err(FulfillmentError::InvalidState(_))
        ));

        let other = c
            .create(NewMovement::new(key, MovementType::Inbound, 1), UserId::new())
            .unwrap();
        c.delete(other.id_typed(), Deadline::none()).unwrap();
        assert!(matches!(
            c.get(other.id_typed()),
            Err(FulfillmentError::NotFound(_))
        ));
    }

    #[test]
    fn cancelled_is_terminal() {
        let c = controller();
        let key = StockKey::product(ProductId::generate());
        let m = approved(&c, key, MovementType::Inbound, 2);

        let cancelled = c
            .cancel(m.id_typed(), UserId::new(), "duplicate", Deadline::none())
            .unwrap();
        assert_eq!(cancelled.status(), MovementStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason(), Some("duplicate"));

        assert!(matches!(
            c.complete(m.id_typed(), Deadline::none()),
            Err(FulfillmentError::InvalidState(_))
        ));
        assert!(matches!(
            c.approve(m.id_typed(), UserId::new(), Deadline::none()),
            Err(FulfillmentError::InvalidState(_))
        ));
    }

    #[test]
    fn list_filters_by_reference_newest_first() {
        let c = controller();
        let key = StockKey::product(ProductId::generate());
        for _ in 0..3 {
            c.create(
                NewMovement::new(key, MovementType::Inbound, 1)
                    .with_reference("ORD-20260101-000042", "order"),
                UserId::new(),
            )
            .unwrap();
        }
        c.create(NewMovement::new(key, MovementType::Inbound, 1), UserId::new())
            .unwrap();

        let page = c
            .list(
                &MovementFilter::for_reference("ORD-20260101-000042"),
                Pagination::new(None, Some(2)),
            )
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].created_at() >= page.items[1].created_at());
    }
}
