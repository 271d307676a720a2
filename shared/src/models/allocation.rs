//! Order allocation and fulfillment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reservation of glazed stock for one order line item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub pedido_id: Uuid,
    pub pedido_item_id: Uuid,
    pub inventory_id: Uuid,
    pub quantity_allocated: i32,
    pub allocated_by: Uuid,
    pub allocated_at: DateTime<Utc>,
}

/// An order line item as seen by the allocation engine (read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub pedido_item_id: Uuid,
    pub pedido_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub esmalte_color_id: Option<Uuid>,
    pub color_name: Option<String>,
    pub quantity_needed: i32,
}

/// Needed vs. allocated counters of a line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineBalance {
    pub quantity_needed: i32,
    pub quantity_allocated: i32,
}

impl LineBalance {
    pub fn new(quantity_needed: i32, quantity_allocated: i32) -> Self {
        Self {
            quantity_needed,
            quantity_allocated,
        }
    }

    /// Units the line may still take; never negative even if the order shrank
    pub fn still_needed(&self) -> i32 {
        (self.quantity_needed - self.quantity_allocated).max(0)
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.still_needed() == 0
    }
}

/// One glazed batch that matches a line's product and color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAvailability {
    pub inventory_id: Uuid,
    pub quantity: i32,
    pub reserved: i32,
    pub available: i32,
    /// Part of `reserved` held by this line
    pub allocated_to_line: i32,
}

/// Availability and shortfall of one order line item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAvailability {
    pub pedido_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub esmalte_color_id: Option<Uuid>,
    pub color_name: Option<String>,
    pub quantity_needed: i32,
    pub quantity_allocated: i32,
    pub still_needed: i32,
    pub batches: Vec<BatchAvailability>,
    pub total_available: i32,
    pub shortfall: i32,
}

impl LineAvailability {
    /// Derive the line's rollup from its matching batches and its allocations
    pub fn compute(line: OrderLine, batches: Vec<BatchAvailability>, quantity_allocated: i32) -> Self {
        let balance = LineBalance::new(line.quantity_needed, quantity_allocated);
        let still_needed = balance.still_needed();
        let total_available: i32 = batches.iter().map(|b| b.available.max(0)).sum();

        Self {
            pedido_item_id: line.pedido_item_id,
            product_id: line.product_id,
            product_name: line.product_name,
            esmalte_color_id: line.esmalte_color_id,
            color_name: line.color_name,
            quantity_needed: line.quantity_needed,
            quantity_allocated,
            still_needed,
            batches,
            total_available,
            shortfall: (still_needed - total_available).max(0),
        }
    }

    pub fn balance(&self) -> LineBalance {
        LineBalance::new(self.quantity_needed, self.quantity_allocated)
    }
}

/// Allocation with display fields for the order screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationView {
    #[serde(flatten)]
    pub allocation: Allocation,
    pub product_id: Uuid,
    pub product_name: String,
    pub esmalte_color_id: Option<Uuid>,
    pub color_name: Option<String>,
}

/// One worksheet row: a batch for a line item, plus the line rollup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorksheetRow {
    pub pedido_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub esmalte_color_id: Option<Uuid>,
    pub color_name: Option<String>,
    pub inventory_id: Option<Uuid>,
    pub batch_available: i32,
    pub allocated_from_batch: i32,
    pub quantity_needed: i32,
    pub quantity_allocated: i32,
    pub still_needed: i32,
    pub shortfall: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorksheetTotals {
    pub lines: i32,
    pub lines_fully_allocated: i32,
    pub total_needed: i64,
    pub total_allocated: i64,
    pub total_shortfall: i64,
}

/// Allocation worksheet of an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentWorksheet {
    pub pedido_id: Uuid,
    pub rows: Vec<WorksheetRow>,
    pub totals: WorksheetTotals,
}

impl FulfillmentWorksheet {
    /// Flatten per-line availability into one row per matching batch
    pub fn from_lines(pedido_id: Uuid, lines: &[LineAvailability]) -> Self {
        let mut rows = Vec::new();
        let mut totals = WorksheetTotals::default();

        for line in lines {
            totals.lines += 1;
            if line.balance().is_fully_allocated() {
                totals.lines_fully_allocated += 1;
            }
            totals.total_needed += i64::from(line.quantity_needed);
            totals.total_allocated += i64::from(line.quantity_allocated);
            totals.total_shortfall += i64::from(line.shortfall);

            let row = |batch: Option<&BatchAvailability>| WorksheetRow {
                pedido_item_id: line.pedido_item_id,
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                esmalte_color_id: line.esmalte_color_id,
                color_name: line.color_name.clone(),
                inventory_id: batch.map(|b| b.inventory_id),
                batch_available: batch.map_or(0, |b| b.available),
                allocated_from_batch: batch.map_or(0, |b| b.allocated_to_line),
                quantity_needed: line.quantity_needed,
                quantity_allocated: line.quantity_allocated,
                still_needed: line.still_needed,
                shortfall: line.shortfall,
            };

            if line.batches.is_empty() {
                rows.push(row(None));
            } else {
                rows.extend(line.batches.iter().map(|b| row(Some(b))));
            }
        }

        Self {
            pedido_id,
            rows,
            totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(needed: i32) -> OrderLine {
        OrderLine {
            pedido_item_id: Uuid::new_v4(),
            pedido_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Taza 250ml".to_string(),
            esmalte_color_id: Some(Uuid::new_v4()),
            color_name: Some("Rojo".to_string()),
            quantity_needed: needed,
        }
    }

    fn batch(quantity: i32, reserved: i32, allocated_to_line: i32) -> BatchAvailability {
        BatchAvailability {
            inventory_id: Uuid::new_v4(),
            quantity,
            reserved,
            available: quantity - reserved,
            allocated_to_line,
        }
    }

    #[test]
    fn test_shortfall_when_batches_cover_part_of_the_line() {
        let availability = LineAvailability::compute(line(30), vec![batch(10, 2, 0), batch(5, 0, 0)], 4);

        assert_eq!(availability.still_needed, 26);
        assert_eq!(availability.total_available, 13);
        assert_eq!(availability.shortfall, 13);
    }

    #[test]
    fn test_no_shortfall_when_stock_exceeds_need() {
        let availability = LineAvailability::compute(line(10), vec![batch(50, 0, 0)], 0);

        assert_eq!(availability.still_needed, 10);
        assert_eq!(availability.shortfall, 0);
    }

    #[test]
    fn test_still_needed_clamped_when_order_shrank() {
        let balance = LineBalance::new(5, 8);
        assert_eq!(balance.still_needed(), 0);
        assert!(balance.is_fully_allocated());
    }

    #[test]
    fn test_worksheet_emits_placeholder_row_for_line_without_batches() {
        let covered = LineAvailability::compute(line(20), vec![batch(20, 20, 20)], 20);
        let uncovered = LineAvailability::compute(line(7), vec![], 0);
        let pedido_id = Uuid::new_v4();

        let sheet = FulfillmentWorksheet::from_lines(pedido_id, &[covered, uncovered]);

        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[1].inventory_id, None);
        assert_eq!(sheet.rows[1].shortfall, 7);
        assert_eq!(sheet.totals.lines, 2);
        assert_eq!(sheet.totals.lines_fully_allocated, 1);
        assert_eq!(sheet.totals.total_needed, 27);
        assert_eq!(sheet.totals.total_allocated, 20);
        assert_eq!(sheet.totals.total_shortfall, 7);
    }
}
