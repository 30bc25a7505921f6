//! Postgres-backed implementation of the store traits.
//!
//! Stock levels are stored as plain columns; movements, adjustments and orders
//! are stored as JSONB documents next to the columns used for filtering.
//! Optimistic concurrency is enforced with `UPDATE … WHERE version = $n`
//! inside a transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation) | `23514` | `Backend` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed / RowNotFound / other | N/A | `Backend` |
//!
//! ## Sync bridge
//!
//! The store traits are synchronous. The trait impls run the async queries on
//! the ambient tokio runtime via `block_in_place`, which requires the
//! multi-thread runtime flavor; other contexts get `StoreError::Backend`.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use storekeep_core::{AggregateRoot, ExpectedVersion};
use storekeep_inventory::{
    InventoryAdjustment, InventoryMovement, MovementId, StockKey, StockLevel, StockQuantities,
    StockSettings,
};
use storekeep_orders::{Order, OrderId, OrderNumber};
use storekeep_products::{ProductId, VariantId};

use super::query::{MovementFilter, OrderFilter, Page, Pagination};
use super::r#trait::{
    AdjustmentStore, LedgerCommit, MovementStore, OrderStore, StockLevelStore, StoreError,
    Versioned,
};

/// DDL applied by [`PostgresStore::migrate`]. Requires PostgreSQL 15+
/// (`NULLS NOT DISTINCT`).
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_levels (
    product_id          UUID        NOT NULL,
    variant_id          UUID,
    available_quantity  BIGINT      NOT NULL,
    reserved_quantity   BIGINT      NOT NULL,
    incoming_quantity   BIGINT      NOT NULL,
    total_quantity      BIGINT      NOT NULL,
    min_stock_level     BIGINT      NOT NULL DEFAULT 0,
    max_stock_level     BIGINT,
    reorder_point       BIGINT,
    last_movement_at    TIMESTAMPTZ,
    version             BIGINT      NOT NULL,
    CONSTRAINT stock_levels_key UNIQUE NULLS NOT DISTINCT (product_id, variant_id),
    CONSTRAINT stock_levels_available_non_negative CHECK (available_quantity >= 0)
);

CREATE TABLE IF NOT EXISTS inventory_movements (
    movement_id     UUID        PRIMARY KEY,
    product_id      UUID        NOT NULL,
    variant_id      UUID,
    movement_type   TEXT        NOT NULL,
    status          TEXT        NOT NULL,
    reference       TEXT,
    created_at      TIMESTAMPTZ,
    version         BIGINT      NOT NULL,
    document        JSONB       NOT NULL
);
CREATE INDEX IF NOT EXISTS inventory_movements_key_idx
    ON inventory_movements (product_id, variant_id);
CREATE INDEX IF NOT EXISTS inventory_movements_reference_idx
    ON inventory_movements (reference);

CREATE TABLE IF NOT EXISTS inventory_adjustments (
    adjustment_id   UUID        PRIMARY KEY,
    product_id      UUID        NOT NULL,
    variant_id      UUID,
    created_at      TIMESTAMPTZ NOT NULL,
    document        JSONB       NOT NULL
);
CREATE INDEX IF NOT EXISTS inventory_adjustments_key_idx
    ON inventory_adjustments (product_id, variant_id, created_at DESC);

CREATE TABLE IF NOT EXISTS orders (
    order_id        UUID        PRIMARY KEY,
    order_number    TEXT        NOT NULL UNIQUE,
    status          TEXT        NOT NULL,
    created_at      TIMESTAMPTZ,
    version         BIGINT      NOT NULL,
    document        JSONB       NOT NULL
);
CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status, created_at DESC);
"#;

const LEVEL_COLUMNS: &str = "product_id, variant_id, available_quantity, reserved_quantity, \
     incoming_quantity, total_quantity, min_stock_level, max_stock_level, reorder_point, \
     last_movement_at, version";

/// Postgres-backed store for levels, movements, adjustments and orders.
///
/// `Send + Sync`; clones share the same pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub async fn fetch_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LEVEL_COLUMNS} FROM stock_levels \
             WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2"
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.variant_id.map(|v| *v.as_uuid()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_level", e))?;

        row.as_ref().map(level_from_row).transpose()
    }

    pub async fn fetch_levels(&self) -> Result<Vec<StockLevel>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEVEL_COLUMNS} FROM stock_levels ORDER BY product_id, variant_id NULLS FIRST"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_levels", e))?;

        rows.iter().map(level_from_row).collect()
    }

    /// Apply a [`LedgerCommit`] in one transaction.
    #[instrument(
        skip(self, commit),
        fields(
            levels = commit.levels.len(),
            movements = commit.movements.len(),
            adjustments = commit.adjustments.len(),
            orders = commit.orders.len()
        ),
        err
    )]
    pub async fn commit_batch(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        if commit.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for write in &commit.levels {
            if let Err(e) = write_level(&mut tx, write).await {
                rollback(tx).await?;
                return Err(e);
            }
        }
        for write in &commit.movements {
            if let Err(e) = write_movement(&mut tx, &write.record, write.expected).await {
                rollback(tx).await?;
                return Err(e);
            }
        }
        for adjustment in &commit.adjustments {
            if let Err(e) = insert_adjustment(&mut tx, adjustment).await {
                rollback(tx).await?;
                return Err(e);
            }
        }
        for write in &commit.orders {
            if let Err(e) = write_order(&mut tx, &write.record, write.expected).await {
                rollback(tx).await?;
                return Err(e);
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    pub async fn upsert_movement(
        &self,
        movement: &InventoryMovement,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        if let Err(e) = write_movement(&mut tx, movement, expected).await {
            rollback(tx).await?;
            return Err(e);
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    pub async fn fetch_movement(
        &self,
        id: MovementId,
    ) -> Result<Option<InventoryMovement>, StoreError> {
        let row = sqlx::query("SELECT document FROM inventory_movements WHERE movement_id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_movement", e))?;

        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn remove_movement(
        &self,
        id: MovementId,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = match expected {
            ExpectedVersion::Exact(v) => {
                sqlx::query("DELETE FROM inventory_movements WHERE movement_id = $1 AND version = $2")
                    .bind(id.as_uuid())
                    .bind(version_param(v)?)
                    .execute(&*self.pool)
                    .await
            }
            _ => {
                sqlx::query("DELETE FROM inventory_movements WHERE movement_id = $1")
                    .bind(id.as_uuid())
                    .execute(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("remove_movement", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.fetch_movement(id).await? {
            Some(_) => Err(StoreError::Conflict(format!(
                "movement {id}: expected {expected:?}"
            ))),
            None => Err(StoreError::NotFound(format!("movement {id}"))),
        }
    }

    pub async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryMovement>, StoreError> {
        const WHERE: &str = "WHERE ($1::uuid IS NULL OR product_id = $1) \
             AND ($2::uuid IS NULL OR variant_id = $2) \
             AND ($3::text IS NULL OR movement_type = $3) \
             AND ($4::text IS NULL OR status = $4) \
             AND ($5::text IS NULL OR reference = $5)";

        let product = filter.product_id.map(|p| *p.as_uuid());
        let variant = filter.variant_id.map(|v| *v.as_uuid());
        let movement_type = filter.movement_type.map(|t| t.as_str());
        let status = filter.status.map(|s| s.as_str());
        let reference = filter.reference.as_deref();

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM inventory_movements {WHERE}"
        ))
        .bind(product)
        .bind(variant)
        .bind(movement_type)
        .bind(status)
        .bind(reference)
        .fetch_one(&*self.pool)
        .await
        .and_then(|row| row.try_get("total"))
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let rows = sqlx::query(&format!(
            "SELECT document FROM inventory_movements {WHERE} \
             ORDER BY created_at DESC NULLS LAST, movement_id DESC LIMIT $6 OFFSET $7"
        ))
        .bind(product)
        .bind(variant)
        .bind(movement_type)
        .bind(status)
        .bind(reference)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        Ok(Page {
            items: rows.iter().map(document_from_row).collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
        })
    }

    pub async fn fetch_adjustments(
        &self,
        key: &StockKey,
    ) -> Result<Vec<InventoryAdjustment>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM inventory_adjustments \
             WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 \
             ORDER BY created_at DESC, adjustment_id DESC",
        )
        .bind(key.product_id.as_uuid())
        .bind(key.variant_id.map(|v| *v.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_adjustments", e))?;

        rows.iter().map(document_from_row).collect()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    pub async fn insert_order_row(&self, order: &Order) -> Result<(), StoreError> {
        let number = order
            .order_number()
            .ok_or_else(|| StoreError::Backend("order has no number".to_string()))?;

        sqlx::query(
            "INSERT INTO orders (order_id, order_number, status, created_at, version, document) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*order.id_typed().as_uuid())
        .bind(number.as_str())
        .bind(order.status().as_str())
        .bind(order.created_at())
        .bind(version_param(order.version())?)
        .bind(to_document(order)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        Ok(())
    }

    pub async fn fetch_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT document FROM orders WHERE order_id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_order", e))?;

        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn fetch_order_by_number(
        &self,
        number: &OrderNumber,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT document FROM orders WHERE order_number = $1")
            .bind(number.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_order_by_number", e))?;

        row.as_ref().map(document_from_row).transpose()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed(), expected = ?expected), err)]
    pub async fn update_order(
        &self,
        order: &Order,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = match expected {
            ExpectedVersion::NoRecord => return self.insert_order_row(order).await,
            ExpectedVersion::Exact(v) => {
                sqlx::query(
                    "UPDATE orders SET status = $2, version = $3, document = $4 \
                     WHERE order_id = $1 AND version = $5",
                )
                .bind(*order.id_typed().as_uuid())
                .bind(order.status().as_str())
                .bind(version_param(order.version())?)
                .bind(to_document(order)?)
                .bind(version_param(v)?)
                .execute(&*self.pool)
                .await
            }
            ExpectedVersion::Any => {
                sqlx::query(
                    "UPDATE orders SET status = $2, version = $3, document = $4 \
                     WHERE order_id = $1",
                )
                .bind(*order.id_typed().as_uuid())
                .bind(order.status().as_str())
                .bind(version_param(order.version())?)
                .bind(to_document(order)?)
                .execute(&*self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("update_order", e))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!(
                "order {}: expected {expected:?}",
                order.id_typed()
            )))
        }
    }

    pub async fn query_orders(
        &self,
        filter: &OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<Order>, StoreError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM orders WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&*self.pool)
        .await
        .and_then(|row| row.try_get("total"))
        .map_err(|e| map_sqlx_error("count_orders", e))?;

        let rows = sqlx::query(
            "SELECT document FROM orders WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC NULLS LAST, order_id DESC LIMIT $2 OFFSET $3",
        )
        .bind(status)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_orders", e))?;

        Ok(Page {
            items: rows.iter().map(document_from_row).collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
        })
    }
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))
}

async fn write_level(
    tx: &mut Transaction<'_, Postgres>,
    write: &Versioned<StockLevel>,
) -> Result<(), StoreError> {
    let level = &write.record;
    let key = level.key();
    let q = level.quantities();
    let s = level.settings();

    let sql = match write.expected {
        ExpectedVersion::NoRecord => format!(
            "INSERT INTO stock_levels ({LEVEL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT ON CONSTRAINT stock_levels_key DO NOTHING"
        ),
        ExpectedVersion::Exact(_) => "UPDATE stock_levels SET \
             available_quantity = $3, reserved_quantity = $4, incoming_quantity = $5, \
             total_quantity = $6, min_stock_level = $7, max_stock_level = $8, \
             reorder_point = $9, last_movement_at = $10, version = $11 \
             WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 AND version = $12"
            .to_string(),
        ExpectedVersion::Any => format!(
            "INSERT INTO stock_levels ({LEVEL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT ON CONSTRAINT stock_levels_key DO UPDATE SET \
             available_quantity = EXCLUDED.available_quantity, \
             reserved_quantity = EXCLUDED.reserved_quantity, \
             incoming_quantity = EXCLUDED.incoming_quantity, \
             total_quantity = EXCLUDED.total_quantity, \
             min_stock_level = EXCLUDED.min_stock_level, \
             max_stock_level = EXCLUDED.max_stock_level, \
             reorder_point = EXCLUDED.reorder_point, \
             last_movement_at = EXCLUDED.last_movement_at, \
             version = EXCLUDED.version"
        ),
    };

    let mut query = sqlx::query(&sql)
        .bind(key.product_id.as_uuid())
        .bind(key.variant_id.map(|v| *v.as_uuid()))
        .bind(q.available)
        .bind(q.reserved)
        .bind(q.incoming)
        .bind(q.total)
        .bind(s.min_stock_level)
        .bind(s.max_stock_level)
        .bind(s.reorder_point)
        .bind(level.last_movement_at())
        .bind(version_param(level.version())?);
    if let ExpectedVersion::Exact(v) = write.expected {
        query = query.bind(version_param(v)?);
    }

    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_level", e))?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "stock level for {key}: expected {:?}",
            write.expected
        )))
    }
}

async fn write_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &InventoryMovement,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let key = movement.key();
    let sql = match expected {
        ExpectedVersion::NoRecord => {
            "INSERT INTO inventory_movements \
             (movement_id, product_id, variant_id, movement_type, status, reference, created_at, version, document) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        }
        ExpectedVersion::Exact(_) => {
            "UPDATE inventory_movements SET status = $5, reference = $6, version = $8, document = $9 \
             WHERE movement_id = $1 AND product_id = $2 AND variant_id IS NOT DISTINCT FROM $3 \
             AND movement_type = $4 AND created_at IS NOT DISTINCT FROM $7 AND version = $10"
        }
        ExpectedVersion::Any => {
            "INSERT INTO inventory_movements \
             (movement_id, product_id, variant_id, movement_type, status, reference, created_at, version, document) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (movement_id) DO UPDATE SET status = EXCLUDED.status, \
             reference = EXCLUDED.reference, version = EXCLUDED.version, document = EXCLUDED.document"
        }
    };

    let mut query = sqlx::query(sql)
        .bind(*movement.id_typed().as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.variant_id.map(|v| *v.as_uuid()))
        .bind(movement.movement_type().as_str())
        .bind(movement.status().as_str())
        .bind(movement.reference())
        .bind(movement.created_at())
        .bind(version_param(movement.version())?)
        .bind(to_document(movement)?);
    if let ExpectedVersion::Exact(v) = expected {
        query = query.bind(version_param(v)?);
    }

    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_movement", e))?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "movement {}: expected {expected:?}",
            movement.id_typed()
        )))
    }
}

/// Orders inside a ledger commit always exist already.
async fn write_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let mut query = match expected {
        ExpectedVersion::NoRecord => {
            return Err(StoreError::Backend(format!(
                "ledger commit cannot create order {}",
                order.id_typed()
            )));
        }
        ExpectedVersion::Exact(_) => sqlx::query(
            "UPDATE orders SET status = $2, version = $3, document = $4 \
             WHERE order_id = $1 AND version = $5",
        ),
        ExpectedVersion::Any => sqlx::query(
            "UPDATE orders SET status = $2, version = $3, document = $4 WHERE order_id = $1",
        ),
    }
    .bind(*order.id_typed().as_uuid())
    .bind(order.status().as_str())
    .bind(version_param(order.version())?)
    .bind(to_document(order)?);
    if let ExpectedVersion::Exact(v) = expected {
        query = query.bind(version_param(v)?);
    }

    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_order", e))?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "order {}: expected {expected:?}",
            order.id_typed()
        )))
    }
}

async fn insert_adjustment(
    tx: &mut Transaction<'_, Postgres>,
    adjustment: &InventoryAdjustment,
) -> Result<(), StoreError> {
    let key = adjustment.key();
    sqlx::query(
        "INSERT INTO inventory_adjustments (adjustment_id, product_id, variant_id, created_at, document) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(adjustment.id_typed().as_uuid())
    .bind(key.product_id.as_uuid())
    .bind(key.variant_id.map(|v| *v.as_uuid()))
    .bind(adjustment.created_at())
    .bind(to_document(adjustment)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_adjustment", e))?;
    Ok(())
}

fn level_from_row(row: &PgRow) -> Result<StockLevel, StoreError> {
    let read = |e: sqlx::Error| StoreError::Serialization(format!("stock level row: {e}"));

    let product_id: Uuid = row.try_get("product_id").map_err(read)?;
    let variant_id: Option<Uuid> = row.try_get("variant_id").map_err(read)?;
    let version: i64 = row.try_get("version").map_err(read)?;
    let last_movement_at: Option<DateTime<Utc>> = row.try_get("last_movement_at").map_err(read)?;

    let key = StockKey {
        product_id: ProductId::from(product_id),
        variant_id: variant_id.map(VariantId::from),
    };
    let quantities = StockQuantities {
        available: row.try_get("available_quantity").map_err(read)?,
        reserved: row.try_get("reserved_quantity").map_err(read)?,
        incoming: row.try_get("incoming_quantity").map_err(read)?,
        total: row.try_get("total_quantity").map_err(read)?,
    };
    let settings = StockSettings {
        min_stock_level: row.try_get("min_stock_level").map_err(read)?,
        max_stock_level: row.try_get("max_stock_level").map_err(read)?,
        reorder_point: row.try_get("reorder_point").map_err(read)?,
    };

    Ok(StockLevel::restore(
        key,
        quantities,
        settings,
        last_movement_at,
        u64::try_from(version).map_err(|_| StoreError::Serialization("negative version".into()))?,
    ))
}

fn document_from_row<T: serde::de::DeserializeOwned>(row: &PgRow) -> Result<T, StoreError> {
    let document: serde_json::Value = row
        .try_get("document")
        .map_err(|e| StoreError::Serialization(format!("document column: {e}")))?;
    serde_json::from_value(document).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_document<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn version_param(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Backend(format!("version {version} overflows BIGINT")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Run an async store call from synchronous code.
fn block_on<T, F>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend("PostgresStore requires a tokio runtime".to_string())
    })?;
    if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
        return Err(StoreError::Backend(
            "PostgresStore requires the multi-thread tokio runtime".to_string(),
        ));
    }
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl StockLevelStore for PostgresStore {
    fn get_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StoreError> {
        block_on(self.fetch_level(key))
    }

    fn list_levels(&self) -> Result<Vec<StockLevel>, StoreError> {
        block_on(self.fetch_levels())
    }

    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        block_on(self.commit_batch(commit))
    }
}

impl MovementStore for PostgresStore {
    fn insert_movement(&self, movement: &InventoryMovement) -> Result<(), StoreError> {
        block_on(self.upsert_movement(movement, ExpectedVersion::NoRecord))
    }

    fn get_movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError> {
        block_on(self.fetch_movement(id))
    }

    fn save_movement(
        &self,
        movement: &InventoryMovement,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        block_on(self.upsert_movement(movement, expected))
    }

    fn delete_movement(&self, id: MovementId, expected: ExpectedVersion) -> Result<(), StoreError> {
        block_on(self.remove_movement(id, expected))
    }

    fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryMovement>, StoreError> {
        block_on(self.query_movements(filter, pagination))
    }
}

impl AdjustmentStore for PostgresStore {
    fn list_adjustments(&self, key: &StockKey) -> Result<Vec<InventoryAdjustment>, StoreError> {
        block_on(self.fetch_adjustments(key))
    }
}

impl OrderStore for PostgresStore {
    fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        block_on(self.insert_order_row(order))
    }

    fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        block_on(self.fetch_order(id))
    }

    fn get_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        block_on(self.fetch_order_by_number(number))
    }

    fn save_order(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        block_on(self.update_order(order, expected))
    }

    fn list_orders(
        &self,
        filter: &OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<Order>, StoreError> {
        block_on(self.query_orders(filter, pagination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_every_table() {
        for table in [
            "stock_levels",
            "inventory_movements",
            "inventory_adjustments",
            "orders",
        ] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
        assert!(SCHEMA.contains("order_number    TEXT        NOT NULL UNIQUE"));
    }

    #[test]
    fn sync_calls_outside_a_runtime_fail_cleanly() {
        let result: Result<(), StoreError> = block_on(async { Ok(()) });
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[test]
    fn versions_beyond_bigint_are_rejected() {
        assert_eq!(version_param(7), Ok(7));
        assert!(version_param(u64::MAX).is_err());
    }
}
