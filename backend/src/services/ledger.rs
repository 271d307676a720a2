//! Inventory ledger: stock counters per (product, stage, color) and the movement log

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{
    CostSnapshot, InventoryMovement, InventoryRecord, LedgerDiscrepancy, NewMovement, PageRequest,
    Stage, StageSummary, StockKey,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::begin_snapshot;

const RECORD_COLUMNS: &str = "id, product_id, stage, esmalte_color_id, quantity, reserved, \
     cost_pasta, cost_labor, cost_glaze, cost_firing, cost_seeded_at, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, movement_type, product_id, from_stage, from_color, \
     to_stage, to_color, quantity, notes, created_by, created_at";

/// Ledger over `inventory_records` and `inventory_movements`
///
/// Write helpers take a connection so callers can compose them inside one
/// transaction; reads go straight to the pool.
#[derive(Clone)]
pub struct InventoryLedger {
    db: PgPool,
}

/// Record with the catalog fields the production screen shows
#[derive(Debug, Clone, Serialize)]
pub struct InventoryRecordView {
    #[serde(flatten)]
    pub record: InventoryRecord,
    pub product_name: String,
    pub product_type: Option<String>,
    pub size: Option<String>,
    pub color_name: Option<String>,
}

/// Movement with display names
#[derive(Debug, Clone, Serialize)]
pub struct MovementView {
    #[serde(flatten)]
    pub movement: InventoryMovement,
    pub product_name: String,
    pub from_color_name: Option<String>,
    pub to_color_name: Option<String>,
}

#[derive(Debug, FromRow)]
pub(crate) struct InventoryRow {
    id: Uuid,
    product_id: Uuid,
    stage: String,
    esmalte_color_id: Option<Uuid>,
    quantity: i32,
    reserved: i32,
    cost_pasta: Decimal,
    cost_labor: Decimal,
    cost_glaze: Decimal,
    cost_firing: Decimal,
    cost_seeded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InventoryRow> for InventoryRecord {
    type Error = AppError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        Ok(InventoryRecord {
            id: row.id,
            product_id: row.product_id,
            stage: row
                .stage
                .parse()
                .map_err(|e| AppError::Internal(format!("inventory record {}: {}", row.id, e)))?,
            esmalte_color_id: row.esmalte_color_id,
            quantity: row.quantity,
            reserved: row.reserved,
            costs: CostSnapshot {
                cost_pasta: row.cost_pasta,
                cost_labor: row.cost_labor,
                cost_glaze: row.cost_glaze,
                cost_firing: row.cost_firing,
            },
            cost_seeded_at: row.cost_seeded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RecordViewRow {
    #[sqlx(flatten)]
    record: InventoryRow,
    product_name: String,
    product_type: Option<String>,
    size: Option<String>,
    color_name: Option<String>,
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    movement_type: String,
    product_id: Uuid,
    from_stage: Option<String>,
    from_color: Option<Uuid>,
    to_stage: Option<String>,
    to_color: Option<Uuid>,
    quantity: i32,
    notes: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for InventoryMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt =
            move |e: shared::UnknownVariant| AppError::Internal(format!("inventory movement {}: {}", id, e));

        Ok(InventoryMovement {
            id: row.id,
            movement_type: row.movement_type.parse().map_err(corrupt)?,
            product_id: row.product_id,
            from_stage: row
                .from_stage
                .as_deref()
                .map(str::parse::<Stage>)
                .transpose()
                .map_err(corrupt)?,
            from_color: row.from_color,
            to_stage: row
                .to_stage
                .as_deref()
                .map(str::parse::<Stage>)
                .transpose()
                .map_err(corrupt)?,
            to_color: row.to_color,
            quantity: row.quantity,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MovementViewRow {
    #[sqlx(flatten)]
    movement: MovementRow,
    product_name: String,
    from_color_name: Option<String>,
    to_color_name: Option<String>,
}

impl InventoryLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ========================================================================
    // Write helpers (caller owns the transaction)
    // ========================================================================

    /// Insert a zero record for `key` unless one exists
    async fn ensure_exists(&self, conn: &mut PgConnection, key: &StockKey) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_records (product_id, stage, esmalte_color_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id, stage, esmalte_color_id) DO NOTHING
            "#,
        )
        .bind(key.product_id)
        .bind(key.stage.as_str())
        .bind(key.esmalte_color_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    async fn find_id(&self, conn: &mut PgConnection, key: &StockKey) -> AppResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM inventory_records
            WHERE product_id = $1 AND stage = $2
              AND esmalte_color_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(key.product_id)
        .bind(key.stage.as_str())
        .bind(key.esmalte_color_id)
        .fetch_one(conn)
        .await
        .map_err(AppError::from)
    }

    /// Return the record for `key`, creating an empty one first if needed, locked
    pub async fn get_or_create(
        &self,
        conn: &mut PgConnection,
        key: StockKey,
    ) -> AppResult<InventoryRecord> {
        self.ensure_exists(&mut *conn, &key).await?;

        let sql = format!(
            r#"
            SELECT {} FROM inventory_records
            WHERE product_id = $1 AND stage = $2
              AND esmalte_color_id IS NOT DISTINCT FROM $3
            FOR UPDATE
            "#,
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, InventoryRow>(&sql)
            .bind(key.product_id)
            .bind(key.stage.as_str())
            .bind(key.esmalte_color_id)
            .fetch_one(conn)
            .await?
            .try_into()
    }

    /// Get-or-create and lock several records, always in ascending id order
    pub async fn lock_many(
        &self,
        conn: &mut PgConnection,
        keys: &[StockKey],
    ) -> AppResult<HashMap<StockKey, InventoryRecord>> {
        if let [key] = keys {
            let record = self.get_or_create(conn, *key).await?;
            return Ok(HashMap::from([(*key, record)]));
        }

        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            self.ensure_exists(&mut *conn, key).await?;
            ids.push(self.find_id(&mut *conn, key).await?);
        }
        ids.sort();
        ids.dedup();

        let mut locked = HashMap::with_capacity(ids.len());
        for id in ids {
            let record = self.lock_by_id(&mut *conn, id).await?;
            locked.insert(record.key(), record);
        }
        Ok(locked)
    }

    /// Lock an existing record by id
    pub async fn lock_by_id(&self, conn: &mut PgConnection, id: Uuid) -> AppResult<InventoryRecord> {
        let sql = format!(
            "SELECT {} FROM inventory_records WHERE id = $1 FOR UPDATE",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, InventoryRow>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Inventory record".to_string()))?
            .try_into()
    }

    /// Add `delta` to a locked record's quantity
    ///
    /// The first positive delta on a record that was never costed copies
    /// `costs` into it; later deltas leave the snapshot alone.
    pub async fn apply_delta(
        &self,
        conn: &mut PgConnection,
        record: &InventoryRecord,
        delta: i32,
        costs: Option<&CostSnapshot>,
        product_name: &str,
    ) -> AppResult<InventoryRecord> {
        let level = shared::apply_delta(record.level(), delta, product_name, record.stage)?;
        let seed = costs.filter(|_| delta > 0 && record.cost_seeded_at.is_none());

        let row = match seed {
            Some(costs) => {
                let sql = format!(
                    r#"
                    UPDATE inventory_records
                    SET quantity = $2, cost_pasta = $3, cost_labor = $4, cost_glaze = $5,
                        cost_firing = $6, cost_seeded_at = NOW(), updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    RECORD_COLUMNS
                );
                sqlx::query_as::<_, InventoryRow>(&sql)
                    .bind(record.id)
                    .bind(level.quantity)
                    .bind(costs.cost_pasta)
                    .bind(costs.cost_labor)
                    .bind(costs.cost_glaze)
                    .bind(costs.cost_firing)
                    .fetch_one(conn)
                    .await?
            }
            None => {
                let sql = format!(
                    "UPDATE inventory_records SET quantity = $2, updated_at = NOW() \
                     WHERE id = $1 RETURNING {}",
                    RECORD_COLUMNS
                );
                sqlx::query_as::<_, InventoryRow>(&sql)
                    .bind(record.id)
                    .bind(level.quantity)
                    .fetch_one(conn)
                    .await?
            }
        };

        row.try_into()
    }

    /// Overwrite the reserved counter of a locked record
    pub async fn update_reserved(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        reserved: i32,
    ) -> AppResult<InventoryRecord> {
        let sql = format!(
            "UPDATE inventory_records SET reserved = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, InventoryRow>(&sql)
            .bind(id)
            .bind(reserved)
            .fetch_one(conn)
            .await?
            .try_into()
    }

    /// Append one movement to the log
    pub async fn record_movement(
        &self,
        conn: &mut PgConnection,
        movement: &NewMovement,
        notes: Option<&str>,
        created_by: Uuid,
    ) -> AppResult<InventoryMovement> {
        let sql = format!(
            r#"
            INSERT INTO inventory_movements
                (movement_type, product_id, from_stage, from_color, to_stage, to_color,
                 quantity, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            MOVEMENT_COLUMNS
        );
        sqlx::query_as::<_, MovementRow>(&sql)
            .bind(movement.movement_type.as_str())
            .bind(movement.product_id)
            .bind(movement.from.map(|k| k.stage.as_str()))
            .bind(movement.from.and_then(|k| k.esmalte_color_id))
            .bind(movement.to.map(|k| k.stage.as_str()))
            .bind(movement.to.and_then(|k| k.esmalte_color_id))
            .bind(movement.quantity)
            .bind(notes)
            .bind(created_by)
            .fetch_one(conn)
            .await?
            .try_into()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every record with display fields, glazed and most available first
    pub async fn list_all(&self) -> AppResult<Vec<InventoryRecordView>> {
        let rows = sqlx::query_as::<_, RecordViewRow>(
            r#"
            SELECT ir.id, ir.product_id, ir.stage, ir.esmalte_color_id, ir.quantity,
                   ir.reserved, ir.cost_pasta, ir.cost_labor, ir.cost_glaze, ir.cost_firing,
                   ir.cost_seeded_at, ir.created_at, ir.updated_at,
                   p.name AS product_name, pt.name AS product_type, p.size,
                   ec.name AS color_name
            FROM inventory_records ir
            JOIN products p ON p.id = ir.product_id
            LEFT JOIN product_types pt ON pt.id = p.product_type_id
            LEFT JOIN esmalte_colors ec ON ec.id = ir.esmalte_color_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut views = rows
            .into_iter()
            .map(|row| {
                Ok(InventoryRecordView {
                    record: row.record.try_into()?,
                    product_name: row.product_name,
                    product_type: row.product_type,
                    size: row.size,
                    color_name: row.color_name,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        views.sort_by(|a, b| {
            shared::display_cmp(
                (a.record.stage, a.record.available()),
                (b.record.stage, b.record.available()),
            )
            .then_with(|| a.product_name.cmp(&b.product_name))
        });

        Ok(views)
    }

    /// Movement log page, newest first
    pub async fn list_movements(
        &self,
        page: PageRequest,
        product_id: Option<Uuid>,
    ) -> AppResult<Vec<MovementView>> {
        let (limit, offset) = page
            .resolve()
            .map_err(|message| AppError::validation("offset", message))?;

        let rows = sqlx::query_as::<_, MovementViewRow>(
            r#"
            SELECT m.id, m.movement_type, m.product_id, m.from_stage, m.from_color,
                   m.to_stage, m.to_color, m.quantity, m.notes, m.created_by, m.created_at,
                   p.name AS product_name,
                   fc.name AS from_color_name, tc.name AS to_color_name
            FROM inventory_movements m
            JOIN products p ON p.id = m.product_id
            LEFT JOIN esmalte_colors fc ON fc.id = m.from_color
            LEFT JOIN esmalte_colors tc ON tc.id = m.to_color
            WHERE ($1::uuid IS NULL OR m.product_id = $1)
            ORDER BY m.seq DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(product_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(MovementView {
                    movement: row.movement.try_into()?,
                    product_name: row.product_name,
                    from_color_name: row.from_color_name,
                    to_color_name: row.to_color_name,
                })
            })
            .collect()
    }

    /// Quantity, reservation and value totals per stage
    pub async fn summary(&self) -> AppResult<Vec<StageSummary>> {
        let records = Self::all_records(&mut *self.db.acquire().await?).await?;
        Ok(shared::summarize_by_stage(&records))
    }

    /// Replay the whole log and report every counter that disagrees with it
    pub async fn verify(&self) -> AppResult<Vec<LedgerDiscrepancy>> {
        let mut tx = begin_snapshot(&self.db).await?;

        let records = Self::all_records(&mut *tx).await?;
        let sql = format!(
            "SELECT {} FROM inventory_movements ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        let movements = sqlx::query_as::<_, MovementRow>(&sql)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(InventoryMovement::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        tx.commit().await?;

        let discrepancies = shared::find_discrepancies(&records, &movements);
        if discrepancies.is_empty() {
            tracing::debug!(
                records = records.len(),
                movements = movements.len(),
                "Ledger verified"
            );
        } else {
            tracing::warn!(
                count = discrepancies.len(),
                "Ledger counters disagree with the movement log"
            );
        }

        Ok(discrepancies)
    }

    async fn all_records(conn: &mut PgConnection) -> AppResult<Vec<InventoryRecord>> {
        let sql = format!("SELECT {} FROM inventory_records", RECORD_COLUMNS);
        sqlx::query_as::<_, InventoryRow>(&sql)
            .fetch_all(conn)
            .await?
            .into_iter()
            .map(InventoryRecord::try_from)
            .collect()
    }
}
