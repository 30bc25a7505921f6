use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use storekeep_core::{AggregateRoot, ExpectedVersion};
use storekeep_inventory::{InventoryAdjustment, InventoryMovement, MovementId, StockKey, StockLevel};
use storekeep_orders::{Order, OrderId, OrderNumber};

use super::query::{MovementFilter, OrderFilter, Page, Pagination};
use super::r#trait::{
    AdjustmentStore, LedgerCommit, MovementStore, OrderStore, StockLevelStore, StoreError,
};

#[derive(Debug, Default)]
struct OrderTable {
    by_id: HashMap<OrderId, Order>,
    by_number: HashMap<OrderNumber, OrderId>,
}

/// In-memory implementation of every store trait.
///
/// Intended for tests/dev. Locks are always taken in the order
/// levels → movements → adjustments → orders.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    levels: RwLock<HashMap<StockKey, StockLevel>>,
    movements: RwLock<HashMap<MovementId, InventoryMovement>>,
    adjustments: RwLock<Vec<InventoryAdjustment>>,
    orders: RwLock<OrderTable>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

fn check_version(
    expected: ExpectedVersion,
    actual: Option<u64>,
    what: impl FnOnce() -> String,
) -> Result<(), StoreError> {
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{}: expected {expected:?}, found {actual:?}",
            what()
        )))
    }
}

impl StockLevelStore for InMemoryStore {
    fn get_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StoreError> {
        let levels = self.levels.read().map_err(poisoned)?;
        Ok(levels.get(key).cloned())
    }

    fn list_levels(&self) -> Result<Vec<StockLevel>, StoreError> {
        let levels = self.levels.read().map_err(poisoned)?;
        let mut all: Vec<_> = levels.values().cloned().collect();
        all.sort_by_key(StockLevel::key);
        Ok(all)
    }

    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        if commit.is_empty() {
            return Ok(());
        }

        let mut levels = self.levels.write().map_err(poisoned)?;
        let mut movements = self.movements.write().map_err(poisoned)?;
        let mut adjustments = self.adjustments.write().map_err(poisoned)?;
        let mut orders = self.orders.write().map_err(poisoned)?;

        // Validate everything before touching anything.
        let mut seen_keys = HashSet::new();
        for write in &commit.levels {
            let key = write.record.key();
            if !seen_keys.insert(key) {
                return Err(StoreError::Backend(format!("commit writes {key} twice")));
            }
            check_version(write.expected, levels.get(&key).map(StockLevel::version), || {
                format!("stock level for {key}")
            })?;
        }

        let mut seen_movements = HashSet::new();
        for write in &commit.movements {
            let id = write.record.id_typed();
            if !seen_movements.insert(id) {
                return Err(StoreError::Backend(format!("commit writes movement {id} twice")));
            }
            check_version(write.expected, movements.get(&id).map(|m| m.version()), || {
                format!("movement {id}")
            })?;
        }

        for adjustment in &commit.adjustments {
            if adjustments.iter().any(|a| a.id_typed() == adjustment.id_typed()) {
                return Err(StoreError::Conflict(format!(
                    "adjustment {} already recorded",
                    adjustment.id_typed()
                )));
            }
        }

        let mut seen_orders = HashSet::new();
        for write in &commit.orders {
            let id = write.record.id_typed();
            if !seen_orders.insert(id) {
                return Err(StoreError::Backend(format!("commit writes order {id} twice")));
            }
            let current = orders
                .by_id
                .get(&id)
                .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
            check_version(write.expected, Some(current.version()), || format!("order {id}"))?;
        }

        for write in commit.levels {
            levels.insert(write.record.key(), write.record);
        }
        for write in commit.movements {
            movements.insert(write.record.id_typed(), write.record);
        }
        adjustments.extend(commit.adjustments);
        for write in commit.orders {
            orders.by_id.insert(write.record.id_typed(), write.record);
        }

        Ok(())
    }
}

impl MovementStore for InMemoryStore {
    fn insert_movement(&self, movement: &InventoryMovement) -> Result<(), StoreError> {
        let mut movements = self.movements.write().map_err(poisoned)?;
        let id = movement.id_typed();
        if movements.contains_key(&id) {
            return Err(StoreError::Conflict(format!("movement {id} already exists")));
        }
        movements.insert(id, movement.clone());
        Ok(())
    }

    fn get_movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError> {
        let movements = self.movements.read().map_err(poisoned)?;
        Ok(movements.get(&id).cloned())
    }

    fn save_movement(
        &self,
        movement: &InventoryMovement,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut movements = self.movements.write().map_err(poisoned)?;
        let id = movement.id_typed();
        check_version(expected, movements.get(&id).map(|m| m.version()), || {
            format!("movement {id}")
        })?;
        movements.insert(id, movement.clone());
        Ok(())
    }

    fn delete_movement(&self, id: MovementId, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut movements = self.movements.write().map_err(poisoned)?;
        let Some(current) = movements.get(&id) else {
            return Err(StoreError::NotFound(format!("movement {id}")));
        };
        check_version(expected, Some(current.version()), || format!("movement {id}"))?;
        movements.remove(&id);
        Ok(())
    }

    fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryMovement>, StoreError> {
        let movements = self.movements.read().map_err(poisoned)?;
        let mut matching: Vec<_> = movements
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(pagination.slice(matching))
    }
}

impl AdjustmentStore for InMemoryStore {
    fn list_adjustments(&self, key: &StockKey) -> Result<Vec<InventoryAdjustment>, StoreError> {
        let adjustments = self.adjustments.read().map_err(poisoned)?;
        Ok(adjustments
            .iter()
            .rev()
            .filter(|a| a.key() == *key)
            .cloned()
            .collect())
    }
}

impl OrderStore for InMemoryStore {
    fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let number = order
            .order_number()
            .cloned()
            .ok_or_else(|| StoreError::Backend("order has no number".to_string()))?;

        let mut table = self.orders.write().map_err(poisoned)?;
        let id = order.id_typed();
        if table.by_id.contains_key(&id) {
            return Err(StoreError::Conflict(format!("order {id} already exists")));
        }
        if table.by_number.contains_key(&number) {
            return Err(StoreError::Conflict(format!(
                "order number {number} already taken"
            )));
        }
        table.by_number.insert(number, id);
        table.by_id.insert(id, order.clone());
        Ok(())
    }

    fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let table = self.orders.read().map_err(poisoned)?;
        Ok(table.by_id.get(&id).cloned())
    }

    fn get_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let table = self.orders.read().map_err(poisoned)?;
        Ok(table
            .by_number
            .get(number)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    fn save_order(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut table = self.orders.write().map_err(poisoned)?;
        let id = order.id_typed();
        check_version(expected, table.by_id.get(&id).map(|o| o.version()), || {
            format!("order {id}")
        })?;
        table.by_id.insert(id, order.clone());
        Ok(())
    }

    fn list_orders(
        &self,
        filter: &OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<Order>, StoreError> {
        let table = self.orders.read().map_err(poisoned)?;
        let mut matching: Vec<_> = table
            .by_id
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(pagination.slice(matching))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Versioned;
    use chrono::Utc;
    use storekeep_inventory::MovementType;
    use storekeep_products::ProductId;

    fn level_with(key: StockKey, available: i64) -> StockLevel {
        let mut level = StockLevel::empty(key);
        level
            .apply_movement(MovementType::Inbound, available, Utc::now())
            .unwrap();
        level.bump_version();
        level
    }

    fn fresh_write(level: StockLevel) -> Versioned<StockLevel> {
        Versioned::new(level, ExpectedVersion::NoRecord)
    }

    #[test]
    fn commit_writes_new_levels() {
        let store = InMemoryStore::new();
        let key = StockKey::product(ProductId::generate());

        store
            .commit(LedgerCommit {
                levels: vec![fresh_write(level_with(key, 7))],
                ..LedgerCommit::default()
            })
            .unwrap();

        let stored = store.get_level(&key).unwrap().unwrap();
        assert_eq!(stored.available_quantity(), 7);
        assert_eq!(stored.version(), 1);
    }

    #[test]
    fn one_stale_level_rejects_the_whole_commit() {
        let store = InMemoryStore::new();
        let a = StockKey::product(ProductId::generate());
        let b = StockKey::product(ProductId::generate());
        store
            .commit(LedgerCommit {
                levels: vec![fresh_write(level_with(b, 1))],
                ..LedgerCommit::default()
            })
            .unwrap();

        // `b` already exists, so NoRecord is stale for it.
        let err = store
            .commit(LedgerCommit {
                levels: vec![fresh_write(level_with(a, 5)), fresh_write(level_with(b, 9))],
                ..LedgerCommit::default()
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_level(&a).unwrap().is_none());
        assert_eq!(store.get_level(&b).unwrap().unwrap().available_quantity(), 1);
    }

    #[test]
    fn duplicate_keys_in_one_commit_are_refused() {
        let store = InMemoryStore::new();
        let key = StockKey::product(ProductId::generate());
        let err = store
            .commit(LedgerCommit {
                levels: vec![fresh_write(level_with(key, 1)), fresh_write(level_with(key, 2))],
                ..LedgerCommit::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn pagination_slices_and_reports_total() {
        let page = Pagination::new(Some(1), Some(2)).slice(vec![1, 2, 3, 4]);
        assert_eq!(page.items, vec![2, 3]);
        assert_eq!(page.total, 4);
        assert!(page.has_more(Pagination::new(Some(1), Some(2))));
        assert_eq!(Pagination::new(None, Some(5_000)).limit, Pagination::MAX_LIMIT);
    }
}
