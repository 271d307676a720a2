//! Read-only lookups against tables owned by the catalog and sales modules
//!
//! Stage transitions resolve these before opening their write transaction so
//! that no row lock is ever held while waiting on a catalog read.

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{CostSnapshot, OrderLine};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Product fields the inventory needs: a display name and the cost snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ProductInfo {
    pub id: Uuid,
    pub name: String,
    pub costs: CostSnapshot,
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    cost_pasta: Decimal,
    cost_labor: Decimal,
    cost_glaze: Decimal,
    cost_firing: Decimal,
}

impl From<ProductRow> for ProductInfo {
    fn from(row: ProductRow) -> Self {
        ProductInfo {
            id: row.id,
            name: row.name,
            costs: CostSnapshot {
                cost_pasta: row.cost_pasta,
                cost_labor: row.cost_labor,
                cost_glaze: row.cost_glaze,
                cost_firing: row.cost_firing,
            },
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct OrderLineRow {
    pub id: Uuid,
    pub pedido_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub esmalte_color_id: Option<Uuid>,
    pub color_name: Option<String>,
    pub quantity: i32,
}

impl From<OrderLineRow> for OrderLine {
    fn from(row: OrderLineRow) -> Self {
        OrderLine {
            pedido_item_id: row.id,
            pedido_id: row.pedido_id,
            product_id: row.product_id,
            product_name: row.product_name,
            esmalte_color_id: row.esmalte_color_id,
            color_name: row.color_name,
            quantity_needed: row.quantity,
        }
    }
}

/// Look up a product and its current unit costs
pub async fn product(conn: &mut PgConnection, product_id: Uuid) -> AppResult<ProductInfo> {
    sqlx::query_as::<_, ProductRow>(
        r#"
        SELECT id, name, cost_pasta, cost_labor, cost_glaze, cost_firing
        FROM products
        WHERE id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(conn)
    .await?
    .map(ProductInfo::from)
    .ok_or_else(|| AppError::NotFound("Product".to_string()))
}

/// Fail with `NotFound` unless the glaze color exists
pub async fn ensure_color(conn: &mut PgConnection, color_id: Uuid) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM esmalte_colors WHERE id = $1)",
    )
    .bind(color_id)
    .fetch_one(conn)
    .await?;

    if !exists {
        return Err(AppError::NotFound("Glaze color".to_string()));
    }
    Ok(())
}

/// Fail with `NotFound` unless the order exists
pub async fn ensure_order(conn: &mut PgConnection, pedido_id: Uuid) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM pedidos WHERE id = $1)")
        .bind(pedido_id)
        .fetch_one(conn)
        .await?;

    if !exists {
        return Err(AppError::NotFound("Order".to_string()));
    }
    Ok(())
}

/// All line items of an order, in entry order
pub async fn order_lines(conn: &mut PgConnection, pedido_id: Uuid) -> AppResult<Vec<OrderLine>> {
    ensure_order(&mut *conn, pedido_id).await?;

    let rows = sqlx::query_as::<_, OrderLineRow>(
        r#"
        SELECT pi.id, pi.pedido_id, pi.product_id, p.name AS product_name,
               pi.esmalte_color_id, ec.name AS color_name, pi.quantity
        FROM pedido_items pi
        JOIN products p ON p.id = pi.product_id
        LEFT JOIN esmalte_colors ec ON ec.id = pi.esmalte_color_id
        WHERE pi.pedido_id = $1
        ORDER BY pi.created_at, pi.id
        "#,
    )
    .bind(pedido_id)
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(OrderLine::from).collect())
}

/// Lock one line item for the rest of the transaction
///
/// Serializes concurrent allocations against the same line even when they
/// draw from different batches.
pub async fn lock_order_line(conn: &mut PgConnection, pedido_item_id: Uuid) -> AppResult<OrderLine> {
    sqlx::query_as::<_, OrderLineRow>(
        r#"
        SELECT pi.id, pi.pedido_id, pi.product_id, p.name AS product_name,
               pi.esmalte_color_id, ec.name AS color_name, pi.quantity
        FROM pedido_items pi
        JOIN products p ON p.id = pi.product_id
        LEFT JOIN esmalte_colors ec ON ec.id = pi.esmalte_color_id
        WHERE pi.id = $1
        FOR UPDATE OF pi
        "#,
    )
    .bind(pedido_item_id)
    .fetch_optional(conn)
    .await?
    .map(OrderLine::from)
    .ok_or_else(|| AppError::NotFound("Order line item".to_string()))
}
