//! Allocation engine: reserving glazed stock for sales order line items

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{
    check_allocation, release, Allocation, AllocationView, BatchAvailability, LineAvailability,
    LineBalance, OrderLine, Stage,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::catalog;
use crate::services::ledger::InventoryLedger;
use crate::services::retry::retry_on_conflict;
use crate::services::{begin_snapshot, begin_write, LockTimeouts};

const ALLOCATION_COLUMNS: &str =
    "id, pedido_id, pedido_item_id, inventory_id, quantity_allocated, allocated_by, allocated_at";

/// Allocation service
#[derive(Clone)]
pub struct AllocationService {
    db: PgPool,
    ledger: InventoryLedger,
    timeouts: LockTimeouts,
}

/// Body of `POST /ventas/pedidos/allocations`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AllocateRequest {
    pub pedido_id: Uuid,
    pub pedido_item_id: Uuid,
    pub inventory_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
}

#[derive(Debug, FromRow)]
struct AllocationRow {
    id: Uuid,
    pedido_id: Uuid,
    pedido_item_id: Uuid,
    inventory_id: Uuid,
    quantity_allocated: i32,
    allocated_by: Uuid,
    allocated_at: DateTime<Utc>,
}

impl From<AllocationRow> for Allocation {
    fn from(row: AllocationRow) -> Self {
        Allocation {
            id: row.id,
            pedido_id: row.pedido_id,
            pedido_item_id: row.pedido_item_id,
            inventory_id: row.inventory_id,
            quantity_allocated: row.quantity_allocated,
            allocated_by: row.allocated_by,
            allocated_at: row.allocated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AllocationViewRow {
    #[sqlx(flatten)]
    allocation: AllocationRow,
    product_id: Uuid,
    product_name: String,
    esmalte_color_id: Option<Uuid>,
    color_name: Option<String>,
}

/// A glazed record that could serve one of the order's lines
#[derive(Debug, Clone, FromRow)]
pub(crate) struct BatchRow {
    pub inventory_id: Uuid,
    pub product_id: Uuid,
    pub esmalte_color_id: Option<Uuid>,
    pub quantity: i32,
    pub reserved: i32,
}

/// Allocated units per (line item, record)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct AllocatedRow {
    pub pedido_item_id: Uuid,
    pub inventory_id: Uuid,
    pub quantity_allocated: i64,
}

impl AllocationService {
    pub fn new(db: PgPool, timeouts: LockTimeouts) -> Self {
        Self {
            ledger: InventoryLedger::new(db.clone()),
            db,
            timeouts,
        }
    }

    /// Availability and shortfall for every line of an order
    pub async fn availability_for(&self, pedido_id: Uuid) -> AppResult<Vec<LineAvailability>> {
        let mut tx = begin_snapshot(&self.db).await?;
        let lines = load_availability(&mut tx, pedido_id).await?;
        tx.commit().await?;
        Ok(lines)
    }

    /// Reserve units of one glazed record for one line item
    pub async fn allocate(&self, user_id: Uuid, request: AllocateRequest) -> AppResult<Allocation> {
        request.validate()?;

        let request = &request;
        retry_on_conflict("allocate", move || self.allocate_once(user_id, request)).await
    }

    async fn allocate_once(&self, user_id: Uuid, request: &AllocateRequest) -> AppResult<Allocation> {
        let mut tx = begin_write(&self.db, self.timeouts).await?;

        catalog::ensure_order(&mut tx, request.pedido_id).await?;

        // Line first, then record: the same order for every allocation
        let line = catalog::lock_order_line(&mut tx, request.pedido_item_id).await?;
        if line.pedido_id != request.pedido_id {
            return Err(AppError::validation(
                "pedido_item_id",
                "Line item does not belong to this order",
            ));
        }

        let record = self.ledger.lock_by_id(&mut tx, request.inventory_id).await?;
        if record.stage != Stage::Esmaltado {
            return Err(AppError::validation(
                "inventory_id",
                "Only glazed stock can be allocated",
            ));
        }
        if record.product_id != line.product_id || record.esmalte_color_id != line.esmalte_color_id {
            return Err(AppError::validation(
                "inventory_id",
                "Batch does not match the line item's product and color",
            ));
        }

        let allocated = allocated_to_line(&mut tx, line.pedido_item_id).await?;
        check_allocation(
            request.quantity,
            LineBalance::new(line.quantity_needed, allocated),
            record.level(),
            &line.product_name,
        )?;

        self.ledger
            .update_reserved(&mut tx, record.id, record.reserved + request.quantity)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO inventory_allocations
                (pedido_id, pedido_item_id, inventory_id, quantity_allocated, allocated_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            ALLOCATION_COLUMNS
        );
        let allocation: Allocation = sqlx::query_as::<_, AllocationRow>(&sql)
            .bind(request.pedido_id)
            .bind(request.pedido_item_id)
            .bind(request.inventory_id)
            .bind(request.quantity)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?
            .into();

        tx.commit().await?;

        tracing::info!(
            allocation_id = %allocation.id,
            pedido_id = %allocation.pedido_id,
            inventory_id = %allocation.inventory_id,
            quantity = allocation.quantity_allocated,
            "Allocated glazed stock"
        );

        Ok(allocation)
    }

    /// Delete an allocation and give its units back to the record
    pub async fn deallocate(&self, allocation_id: Uuid) -> AppResult<()> {
        retry_on_conflict("deallocate", move || self.deallocate_once(allocation_id)).await
    }

    async fn deallocate_once(&self, allocation_id: Uuid) -> AppResult<()> {
        let mut tx = begin_write(&self.db, self.timeouts).await?;

        let sql = format!(
            "DELETE FROM inventory_allocations WHERE id = $1 RETURNING {}",
            ALLOCATION_COLUMNS
        );
        let allocation: Allocation = sqlx::query_as::<_, AllocationRow>(&sql)
            .bind(allocation_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Allocation".to_string()))?
            .into();

        let record = self.ledger.lock_by_id(&mut tx, allocation.inventory_id).await?;
        let level = release(record.level(), allocation.quantity_allocated);
        if record.reserved < allocation.quantity_allocated {
            tracing::warn!(
                inventory_id = %record.id,
                reserved = record.reserved,
                released = allocation.quantity_allocated,
                "Released more units than the record had reserved"
            );
        }
        self.ledger
            .update_reserved(&mut tx, record.id, level.reserved)
            .await?;

        tx.commit().await?;

        tracing::info!(
            allocation_id = %allocation.id,
            inventory_id = %allocation.inventory_id,
            quantity = allocation.quantity_allocated,
            "Released allocation"
        );

        Ok(())
    }

    /// Allocations of an order with display fields, newest first
    pub async fn list_allocations(&self, pedido_id: Uuid) -> AppResult<Vec<AllocationView>> {
        let mut conn = self.db.acquire().await?;
        catalog::ensure_order(&mut conn, pedido_id).await?;

        let rows = sqlx::query_as::<_, AllocationViewRow>(
            r#"
            SELECT a.id, a.pedido_id, a.pedido_item_id, a.inventory_id, a.quantity_allocated,
                   a.allocated_by, a.allocated_at,
                   ir.product_id, p.name AS product_name,
                   ir.esmalte_color_id, ec.name AS color_name
            FROM inventory_allocations a
            JOIN inventory_records ir ON ir.id = a.inventory_id
            JOIN products p ON p.id = ir.product_id
            LEFT JOIN esmalte_colors ec ON ec.id = ir.esmalte_color_id
            WHERE a.pedido_id = $1
            ORDER BY a.allocated_at DESC, a.id
            "#,
        )
        .bind(pedido_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AllocationView {
                allocation: row.allocation.into(),
                product_id: row.product_id,
                product_name: row.product_name,
                esmalte_color_id: row.esmalte_color_id,
                color_name: row.color_name,
            })
            .collect())
    }
}

/// Units already allocated to a line item
async fn allocated_to_line(conn: &mut PgConnection, pedido_item_id: Uuid) -> AppResult<i32> {
    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(quantity_allocated), 0)::BIGINT FROM inventory_allocations WHERE pedido_item_id = $1",
    )
    .bind(pedido_item_id)
    .fetch_one(conn)
    .await?;

    i32::try_from(total)
        .map_err(|_| AppError::Internal(format!("allocated total {} out of range", total)))
}

/// Read an order's lines, matching glazed batches and allocations in one snapshot
pub(crate) async fn load_availability(
    conn: &mut PgConnection,
    pedido_id: Uuid,
) -> AppResult<Vec<LineAvailability>> {
    let lines = catalog::order_lines(&mut *conn, pedido_id).await?;
    let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();

    let batches = sqlx::query_as::<_, BatchRow>(
        r#"
        SELECT id AS inventory_id, product_id, esmalte_color_id, quantity, reserved
        FROM inventory_records
        WHERE stage = 'ESMALTADO' AND product_id = ANY($1)
        "#,
    )
    .bind(&product_ids)
    .fetch_all(&mut *conn)
    .await?;

    let allocated = sqlx::query_as::<_, AllocatedRow>(
        r#"
        SELECT pedido_item_id, inventory_id, SUM(quantity_allocated)::BIGINT AS quantity_allocated
        FROM inventory_allocations
        WHERE pedido_id = $1
        GROUP BY pedido_item_id, inventory_id
        "#,
    )
    .bind(pedido_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(assemble_availability(lines, &batches, &allocated))
}

/// Attach matching batches and allocated counts to each line
pub(crate) fn assemble_availability(
    lines: Vec<OrderLine>,
    batches: &[BatchRow],
    allocated: &[AllocatedRow],
) -> Vec<LineAvailability> {
    let mut by_line_batch: HashMap<(Uuid, Uuid), i64> = HashMap::new();
    let mut by_line: HashMap<Uuid, i64> = HashMap::new();
    for row in allocated {
        *by_line_batch
            .entry((row.pedido_item_id, row.inventory_id))
            .or_default() += row.quantity_allocated;
        *by_line.entry(row.pedido_item_id).or_default() += row.quantity_allocated;
    }

    lines
        .into_iter()
        .map(|line| {
            let mut matching: Vec<BatchAvailability> = batches
                .iter()
                .filter(|b| b.product_id == line.product_id && b.esmalte_color_id == line.esmalte_color_id)
                .map(|b| BatchAvailability {
                    inventory_id: b.inventory_id,
                    quantity: b.quantity,
                    reserved: b.reserved,
                    available: b.quantity - b.reserved,
                    allocated_to_line: clamp_i32(
                        by_line_batch
                            .get(&(line.pedido_item_id, b.inventory_id))
                            .copied()
                            .unwrap_or(0),
                    ),
                })
                .collect();
            matching.sort_by(|a, b| b.available.cmp(&a.available).then(a.inventory_id.cmp(&b.inventory_id)));

            let quantity_allocated = clamp_i32(by_line.get(&line.pedido_item_id).copied().unwrap_or(0));
            LineAvailability::compute(line, matching, quantity_allocated)
        })
        .collect()
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(0, i64::from(i32::MAX)) as i32
}
