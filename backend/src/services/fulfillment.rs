//! Order fulfillment view: the allocation worksheet of one order

use shared::FulfillmentWorksheet;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::allocation::load_availability;
use crate::services::begin_snapshot;

/// Read-only fulfillment service
#[derive(Clone)]
pub struct FulfillmentService {
    db: PgPool,
}

impl FulfillmentService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// One row per matching batch per line item, with order totals
    pub async fn worksheet(&self, pedido_id: Uuid) -> AppResult<FulfillmentWorksheet> {
        let mut tx = begin_snapshot(&self.db).await?;
        let lines = load_availability(&mut tx, pedido_id).await?;
        tx.commit().await?;

        let worksheet = FulfillmentWorksheet::from_lines(pedido_id, &lines);
        tracing::debug!(
            pedido_id = %pedido_id,
            lines = worksheet.totals.lines,
            shortfall = worksheet.totals.total_shortfall,
            "Built fulfillment worksheet"
        );

        Ok(worksheet)
    }
}
