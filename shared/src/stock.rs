//! Stock rules shared by the ledger, the stage transitions and the allocation engine
//!
//! Everything here is pure: callers load and lock the records, ask these
//! functions what may happen, then persist the outcome.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    InventoryMovement, InventoryRecord, LedgerDiscrepancy, LineBalance, MovementType, NewMovement,
    Stage, StageSummary, StockKey, StockLevel,
};

/// Structured detail of a rejected stock request
///
/// Field names are part of the HTTP contract and rendered verbatim by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product_name: String,
    pub stage: Stage,
    pub available: i32,
    pub requested: i32,
    pub missing: i32,
}

impl StockShortfall {
    pub fn new(product_name: impl Into<String>, stage: Stage, available: i32, requested: i32) -> Self {
        Self {
            product_name: product_name.into(),
            stage,
            available,
            requested,
            missing: (requested - available).max(0),
        }
    }
}

/// Rejections produced by the stock rules
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StockError {
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: &'static str,
    },

    #[error(
        "insufficient stock of {} at {}: available {}, requested {}",
        .0.product_name, .0.stage, .0.available, .0.requested
    )]
    InsufficientStock(StockShortfall),

    #[error(
        "allocation exceeds what the line still needs for {}: still needed {}, requested {}",
        .0.product_name, .0.available, .0.requested
    )]
    OverAllocation(StockShortfall),
}

// ============================================================================
// Ledger deltas
// ============================================================================

/// Apply `delta` to a record's quantity, refusing to shrink below what is reserved
pub fn apply_delta(
    level: StockLevel,
    delta: i32,
    product_name: &str,
    stage: Stage,
) -> Result<StockLevel, StockError> {
    let quantity = level
        .quantity
        .checked_add(delta)
        .ok_or(StockError::Invalid {
            field: "quantity",
            message: "Quantity is out of range",
        })?;

    if quantity < level.reserved {
        return Err(StockError::InsufficientStock(StockShortfall::new(
            product_name,
            stage,
            level.available(),
            -delta,
        )));
    }

    Ok(StockLevel::new(quantity, level.reserved))
}

/// Check that `requested` units can be taken out of a record without touching reservations
pub fn ensure_available(
    level: StockLevel,
    requested: i32,
    product_name: &str,
    stage: Stage,
) -> Result<(), StockError> {
    if requested > level.available() {
        return Err(StockError::InsufficientStock(StockShortfall::new(
            product_name,
            stage,
            level.available(),
            requested,
        )));
    }
    Ok(())
}

// ============================================================================
// Stage transitions
// ============================================================================

/// A production operation against the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CrudoInput {
        product_id: Uuid,
        quantity: i32,
    },
    SancochadoProcess {
        product_id: Uuid,
        quantity: i32,
    },
    EsmaltadoProcess {
        product_id: Uuid,
        quantity: i32,
        esmalte_color_id: Uuid,
    },
    Merma {
        product_id: Uuid,
        stage: Stage,
        esmalte_color_id: Option<Uuid>,
        quantity: i32,
    },
    Adjustment {
        product_id: Uuid,
        stage: Stage,
        esmalte_color_id: Option<Uuid>,
        target_quantity: i32,
    },
}

/// Counter changes and log entry that a validated transition produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub source: Option<(StockKey, StockLevel)>,
    pub destination: Option<(StockKey, StockLevel)>,
    pub movement: NewMovement,
}

impl Transition {
    pub fn product_id(&self) -> Uuid {
        match *self {
            Transition::CrudoInput { product_id, .. }
            | Transition::SancochadoProcess { product_id, .. }
            | Transition::EsmaltadoProcess { product_id, .. }
            | Transition::Merma { product_id, .. }
            | Transition::Adjustment { product_id, .. } => product_id,
        }
    }

    pub fn movement_type(&self) -> MovementType {
        match self {
            Transition::CrudoInput { .. } => MovementType::CrudoInput,
            Transition::SancochadoProcess { .. } => MovementType::SancochadoProcess,
            Transition::EsmaltadoProcess { .. } => MovementType::EsmaltadoProcess,
            Transition::Merma { .. } => MovementType::Merma,
            Transition::Adjustment { .. } => MovementType::Adjustment,
        }
    }

    /// Record the transition consumes from, if any
    pub fn source_key(&self) -> Option<StockKey> {
        match *self {
            Transition::CrudoInput { .. } | Transition::Adjustment { .. } => None,
            Transition::SancochadoProcess { product_id, .. } => {
                Some(StockKey::new(product_id, Stage::Crudo, None))
            }
            Transition::EsmaltadoProcess { product_id, .. } => {
                Some(StockKey::new(product_id, Stage::Sancochado, None))
            }
            Transition::Merma {
                product_id,
                stage,
                esmalte_color_id,
                ..
            } => Some(StockKey::new(product_id, stage, esmalte_color_id)),
        }
    }

    /// Record the transition produces into (or resets, for adjustments), if any
    pub fn destination_key(&self) -> Option<StockKey> {
        match *self {
            Transition::CrudoInput { product_id, .. } => {
                Some(StockKey::new(product_id, Stage::Crudo, None))
            }
            Transition::SancochadoProcess { product_id, .. } => {
                Some(StockKey::new(product_id, Stage::Sancochado, None))
            }
            Transition::EsmaltadoProcess {
                product_id,
                esmalte_color_id,
                ..
            } => Some(StockKey::new(product_id, Stage::Esmaltado, Some(esmalte_color_id))),
            Transition::Merma { .. } => None,
            Transition::Adjustment {
                product_id,
                stage,
                esmalte_color_id,
                ..
            } => Some(StockKey::new(product_id, stage, esmalte_color_id)),
        }
    }

    /// Shape checks that need no stock state
    pub fn validate(&self) -> Result<(), StockError> {
        match *self {
            Transition::CrudoInput { quantity, .. }
            | Transition::SancochadoProcess { quantity, .. }
            | Transition::EsmaltadoProcess { quantity, .. } => ensure_positive(quantity),
            Transition::Merma {
                stage,
                esmalte_color_id,
                quantity,
                ..
            } => {
                ensure_positive(quantity)?;
                ensure_color_matches_stage(stage, esmalte_color_id)
            }
            Transition::Adjustment {
                stage,
                esmalte_color_id,
                target_quantity,
                ..
            } => {
                if target_quantity < 0 {
                    return Err(StockError::Invalid {
                        field: "quantity",
                        message: "Target quantity cannot be negative",
                    });
                }
                ensure_color_matches_stage(stage, esmalte_color_id)
            }
        }
    }

    /// Decide the counter changes against the current (locked) levels
    ///
    /// A missing level stands for a record that does not exist yet and is
    /// treated as empty.
    pub fn plan(
        &self,
        source: Option<StockLevel>,
        destination: Option<StockLevel>,
        product_name: &str,
    ) -> Result<TransitionPlan, StockError> {
        self.validate()?;

        let source_key = self.source_key();
        let destination_key = self.destination_key();
        let source_level = source.unwrap_or_default();
        let destination_level = destination.unwrap_or_default();

        let (source_after, destination_after, moved) = match *self {
            Transition::Adjustment {
                stage,
                target_quantity,
                ..
            } => {
                if target_quantity < destination_level.reserved {
                    let shrink = destination_level.quantity - target_quantity;
                    return Err(StockError::InsufficientStock(StockShortfall {
                        product_name: product_name.to_string(),
                        stage,
                        available: destination_level.available(),
                        requested: shrink,
                        missing: destination_level.reserved - target_quantity,
                    }));
                }
                let delta = target_quantity - destination_level.quantity;
                let after = apply_delta(destination_level, delta, product_name, stage)?;
                (None, Some(after), delta)
            }
            Transition::CrudoInput { quantity, .. } => {
                let after = apply_delta(destination_level, quantity, product_name, Stage::Crudo)?;
                (None, Some(after), quantity)
            }
            Transition::SancochadoProcess { quantity, .. }
            | Transition::EsmaltadoProcess { quantity, .. }
            | Transition::Merma { quantity, .. } => {
                // Process and loss operations always have a source
                let source_stage = source_key.map_or(Stage::Crudo, |k| k.stage);
                ensure_available(source_level, quantity, product_name, source_stage)?;
                let source_after = apply_delta(source_level, -quantity, product_name, source_stage)?;
                let destination_after = match destination_key {
                    Some(key) => Some(apply_delta(destination_level, quantity, product_name, key.stage)?),
                    None => None,
                };
                (Some(source_after), destination_after, quantity)
            }
        };

        Ok(TransitionPlan {
            source: source_key.zip(source_after),
            destination: destination_key.zip(destination_after),
            movement: NewMovement {
                movement_type: self.movement_type(),
                product_id: self.product_id(),
                from: source_key,
                to: destination_key,
                quantity: moved,
            },
        })
    }
}

fn ensure_positive(quantity: i32) -> Result<(), StockError> {
    if quantity <= 0 {
        return Err(StockError::Invalid {
            field: "quantity",
            message: "Quantity must be positive",
        });
    }
    Ok(())
}

fn ensure_color_matches_stage(stage: Stage, color: Option<Uuid>) -> Result<(), StockError> {
    match (stage.carries_color(), color) {
        (true, None) => Err(StockError::Invalid {
            field: "esmalte_color_id",
            message: "Glazed stock requires a glaze color",
        }),
        (false, Some(_)) => Err(StockError::Invalid {
            field: "esmalte_color_id",
            message: "Only glazed stock carries a glaze color",
        }),
        _ => Ok(()),
    }
}

// ============================================================================
// Allocation
// ============================================================================

/// Check both allocation bounds: the line's remaining need, then the batch's availability
pub fn check_allocation(
    requested: i32,
    line: LineBalance,
    batch: StockLevel,
    product_name: &str,
) -> Result<(), StockError> {
    ensure_positive(requested)?;

    let still_needed = line.still_needed();
    if requested > still_needed {
        return Err(StockError::OverAllocation(StockShortfall::new(
            product_name,
            Stage::Esmaltado,
            still_needed,
            requested,
        )));
    }

    ensure_available(batch, requested, product_name, Stage::Esmaltado)
}

/// Release `quantity` units of reservation from a record
pub fn release(level: StockLevel, quantity: i32) -> StockLevel {
    StockLevel::new(level.quantity, (level.reserved - quantity).max(0))
}

// ============================================================================
// Read-side helpers
// ============================================================================

/// Listing order: stage priority, then most available first
pub fn display_cmp(a: (Stage, i32), b: (Stage, i32)) -> Ordering {
    a.0.display_priority()
        .cmp(&b.0.display_priority())
        .then_with(|| b.1.cmp(&a.1))
}

/// Sum every movement's effect per record, starting from zero
pub fn replay<'a, I>(movements: I) -> HashMap<StockKey, i64>
where
    I: IntoIterator<Item = &'a InventoryMovement>,
{
    let mut quantities: HashMap<StockKey, i64> = HashMap::new();
    for movement in movements {
        if let Some(to) = movement.to_key() {
            *quantities.entry(to).or_default() += i64::from(movement.quantity);
        }
        if let Some(from) = movement.from_key() {
            *quantities.entry(from).or_default() -= i64::from(movement.quantity);
        }
    }
    quantities
}

/// Compare stored counters with the replayed history
pub fn find_discrepancies(
    records: &[InventoryRecord],
    movements: &[InventoryMovement],
) -> Vec<LedgerDiscrepancy> {
    let mut replayed = replay(movements);
    let mut discrepancies = Vec::new();

    for record in records {
        let expected = replayed.remove(&record.key()).unwrap_or(0);
        let recorded = i64::from(record.quantity);
        if expected != recorded {
            discrepancies.push(LedgerDiscrepancy {
                inventory_id: Some(record.id),
                product_id: record.product_id,
                stage: record.stage,
                esmalte_color_id: record.esmalte_color_id,
                recorded_quantity: recorded,
                replayed_quantity: expected,
                difference: recorded - expected,
            });
        }
    }

    // Tuples that only exist in the log
    for (key, expected) in replayed {
        if expected != 0 {
            discrepancies.push(LedgerDiscrepancy {
                inventory_id: None,
                product_id: key.product_id,
                stage: key.stage,
                esmalte_color_id: key.esmalte_color_id,
                recorded_quantity: 0,
                replayed_quantity: expected,
                difference: -expected,
            });
        }
    }

    discrepancies
}

/// Totals per stage, in display order, including empty stages
pub fn summarize_by_stage(records: &[InventoryRecord]) -> Vec<StageSummary> {
    let mut by_stage: BTreeMap<u8, StageSummary> = Stage::ALL
        .iter()
        .map(|stage| {
            (
                stage.display_priority(),
                StageSummary {
                    stage: *stage,
                    record_count: 0,
                    total_quantity: 0,
                    total_reserved: 0,
                    total_available: 0,
                    total_value: Decimal::ZERO,
                },
            )
        })
        .collect();

    for record in records {
        if let Some(summary) = by_stage.get_mut(&record.stage.display_priority()) {
            summary.record_count += 1;
            summary.total_quantity += i64::from(record.quantity);
            summary.total_reserved += i64::from(record.reserved);
            summary.total_available += i64::from(record.available());
            summary.total_value += record.value();
        }
    }

    by_stage.into_values().collect()
}
